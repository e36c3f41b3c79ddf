//! Rows of the `zones` table.
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Row, SqliteConnection, SqliteExecutor};

use crate::db::decode_error;
use crate::models::{DnssecState, Zone, ZoneKind, ZoneProviderData};

const COLUMNS: &str = r#"
    id, provider_id, name, kind, masters, serial, ttl, dnssec_enabled, auto_dnssec,
    dnssec_state, external_id, provider_data, last_synced, last_check, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct NewZone {
    pub provider_id: i64,
    pub name: String,
    pub kind: ZoneKind,
    pub masters: Vec<String>,
    pub serial: u32,
    pub ttl: u32,
    pub external_id: Option<String>,
    pub provider_data: ZoneProviderData,
}

fn from_row(row: &SqliteRow) -> sqlx::Result<Zone> {
    let kind: String = row.try_get("kind")?;
    let state: String = row.try_get("dnssec_state")?;
    let Json(masters) = row.try_get::<Json<Vec<String>>, _>("masters")?;
    let Json(provider_data) = row.try_get::<Json<ZoneProviderData>, _>("provider_data")?;
    Ok(Zone {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        name: row.try_get("name")?,
        kind: kind.parse().map_err(|e: String| decode_error("kind", e))?,
        masters,
        serial: row.try_get("serial")?,
        ttl: row.try_get("ttl")?,
        dnssec_enabled: row.try_get("dnssec_enabled")?,
        auto_dnssec: row.try_get("auto_dnssec")?,
        dnssec_state: state
            .parse::<DnssecState>()
            .map_err(|e| decode_error("dnssec_state", e))?,
        external_id: row.try_get("external_id")?,
        provider_data,
        last_synced: row.try_get("last_synced")?,
        last_check: row.try_get("last_check")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

pub async fn insert(db: impl SqliteExecutor<'_>, z: &NewZone) -> sqlx::Result<i64> {
    let now = Utc::now();
    let res = sqlx::query(
        r#"
        INSERT INTO zones (
            provider_id, name, kind, masters, serial, ttl, external_id,
            provider_data, last_synced, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(z.provider_id)
    .bind(&z.name)
    .bind(z.kind.as_str())
    .bind(Json(&z.masters))
    .bind(z.serial)
    .bind(z.ttl)
    .bind(&z.external_id)
    .bind(Json(&z.provider_data))
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn find(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<Option<Zone>> {
    let sql = format!("SELECT {COLUMNS} FROM zones WHERE id = ? AND deleted_at IS NULL");
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn find_by_name(
    db: impl SqliteExecutor<'_>,
    provider_id: i64,
    name: &str,
) -> sqlx::Result<Option<Zone>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM zones WHERE provider_id = ? AND name = ? AND deleted_at IS NULL"
    );
    let row = sqlx::query(&sql)
        .bind(provider_id)
        .bind(name)
        .fetch_optional(db)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Live zone with this name under any provider. Used to place derived PTR records.
pub async fn find_by_name_any(
    db: impl SqliteExecutor<'_>,
    name: &str,
) -> sqlx::Result<Option<Zone>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM zones WHERE name = ? AND deleted_at IS NULL ORDER BY id LIMIT 1"
    );
    let row = sqlx::query(&sql).bind(name).fetch_optional(db).await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn list(db: impl SqliteExecutor<'_>, provider_id: Option<i64>) -> sqlx::Result<Vec<Zone>> {
    let rows = match provider_id {
        Some(pid) => {
            let sql = format!(
                "SELECT {COLUMNS} FROM zones WHERE provider_id = ? AND deleted_at IS NULL ORDER BY name"
            );
            sqlx::query(&sql).bind(pid).fetch_all(db).await?
        }
        None => {
            let sql = format!("SELECT {COLUMNS} FROM zones WHERE deleted_at IS NULL ORDER BY name");
            sqlx::query(&sql).fetch_all(db).await?
        }
    };
    rows.iter().map(from_row).collect()
}

pub async fn count_live_for_provider(
    db: impl SqliteExecutor<'_>,
    provider_id: i64,
) -> sqlx::Result<i64> {
    let cnt: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM zones WHERE provider_id = ? AND deleted_at IS NULL",
    )
    .bind(provider_id)
    .fetch_one(db)
    .await?;
    Ok(cnt.0)
}

/// Writes every mutable column of `z`.
pub async fn update(db: impl SqliteExecutor<'_>, z: &Zone) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE zones
        SET
            provider_id = ?,
            kind = ?,
            masters = ?,
            serial = ?,
            ttl = ?,
            dnssec_enabled = ?,
            auto_dnssec = ?,
            dnssec_state = ?,
            external_id = ?,
            provider_data = ?,
            last_synced = ?,
            last_check = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(z.provider_id)
    .bind(z.kind.as_str())
    .bind(Json(&z.masters))
    .bind(z.serial)
    .bind(z.ttl)
    .bind(z.dnssec_enabled)
    .bind(z.auto_dnssec)
    .bind(z.dnssec_state.as_str())
    .bind(&z.external_id)
    .bind(Json(&z.provider_data))
    .bind(z.last_synced)
    .bind(z.last_check)
    .bind(Utc::now())
    .bind(z.id)
    .execute(db)
    .await?;
    Ok(())
}

/// Never lowers the stored serial.
pub async fn set_serial(db: impl SqliteExecutor<'_>, id: i64, serial: u32) -> sqlx::Result<()> {
    sqlx::query("UPDATE zones SET serial = MAX(serial, ?), updated_at = ? WHERE id = ?")
        .bind(serial)
        .bind(Utc::now())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn soft_delete(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<()> {
    let now = Utc::now();
    sqlx::query("UPDATE zones SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn soft_delete_for_provider(
    db: impl SqliteExecutor<'_>,
    provider_id: i64,
) -> sqlx::Result<u64> {
    let now = Utc::now();
    let res = sqlx::query(
        "UPDATE zones SET deleted_at = ?, updated_at = ? WHERE provider_id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(provider_id)
    .execute(db)
    .await?;
    Ok(res.rows_affected())
}

pub async fn reassign(db: impl SqliteExecutor<'_>, from: i64, to: i64) -> sqlx::Result<u64> {
    let res = sqlx::query(
        "UPDATE zones SET provider_id = ?, updated_at = ? WHERE provider_id = ? AND deleted_at IS NULL",
    )
    .bind(to)
    .bind(Utc::now())
    .bind(from)
    .execute(db)
    .await?;
    Ok(res.rows_affected())
}

/// Insert-or-update keyed by `(provider_id, name)`, reviving a soft-deleted row when one
/// exists. Local-only columns (DNSSEC state, auto flags, ttl) survive the update.
pub async fn upsert_synced(conn: &mut SqliteConnection, z: &NewZone) -> sqlx::Result<i64> {
    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM zones
        WHERE provider_id = ? AND name = ?
        ORDER BY deleted_at IS NOT NULL, id DESC
        LIMIT 1
        "#,
    )
    .bind(z.provider_id)
    .bind(&z.name)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((id,)) = existing else {
        return insert(&mut *conn, z).await;
    };

    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE zones
        SET
            kind = ?,
            masters = ?,
            serial = MAX(serial, ?),
            external_id = ?,
            provider_data = ?,
            last_synced = ?,
            updated_at = ?,
            deleted_at = NULL
        WHERE id = ?
        "#,
    )
    .bind(z.kind.as_str())
    .bind(Json(&z.masters))
    .bind(z.serial)
    .bind(&z.external_id)
    .bind(Json(&z.provider_data))
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(id)
}
