//! Rows of the `records` table.
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Row, SqliteConnection, SqliteExecutor};

use crate::db::decode_error;
use crate::models::{Record, RecordProviderData, RecordType};

const COLUMNS: &str = r#"
    id, zone_id, name, type, content, ttl, priority, disabled, comment, external_id,
    provider_data, last_synced, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub zone_id: i64,
    pub name: String,
    pub rtype: RecordType,
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u16>,
    pub disabled: bool,
    pub comment: Option<String>,
    pub external_id: Option<String>,
    pub provider_data: RecordProviderData,
}

fn from_row(row: &SqliteRow) -> sqlx::Result<Record> {
    let rtype: String = row.try_get("type")?;
    let Json(provider_data) = row.try_get::<Json<RecordProviderData>, _>("provider_data")?;
    Ok(Record {
        id: row.try_get("id")?,
        zone_id: row.try_get("zone_id")?,
        name: row.try_get("name")?,
        rtype: rtype.parse().map_err(|e: String| decode_error("type", e))?,
        content: row.try_get("content")?,
        ttl: row.try_get("ttl")?,
        priority: row.try_get("priority")?,
        disabled: row.try_get("disabled")?,
        comment: row.try_get("comment")?,
        external_id: row.try_get("external_id")?,
        provider_data,
        last_synced: row.try_get("last_synced")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

pub async fn insert(db: impl SqliteExecutor<'_>, r: &NewRecord) -> sqlx::Result<i64> {
    let now = Utc::now();
    let res = sqlx::query(
        r#"
        INSERT INTO records (
            zone_id, name, type, content, ttl, priority, disabled, comment,
            external_id, provider_data, last_synced, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(r.zone_id)
    .bind(&r.name)
    .bind(r.rtype.as_str())
    .bind(&r.content)
    .bind(r.ttl)
    .bind(r.priority)
    .bind(r.disabled)
    .bind(&r.comment)
    .bind(&r.external_id)
    .bind(Json(&r.provider_data))
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn find(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<Option<Record>> {
    let sql = format!("SELECT {COLUMNS} FROM records WHERE id = ? AND deleted_at IS NULL");
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn list(db: impl SqliteExecutor<'_>, zone_id: i64) -> sqlx::Result<Vec<Record>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM records WHERE zone_id = ? AND deleted_at IS NULL ORDER BY name, type, content"
    );
    let rows = sqlx::query(&sql).bind(zone_id).fetch_all(db).await?;
    rows.iter().map(from_row).collect()
}

/// Live record with exactly this name, type and content.
pub async fn find_matching(
    db: impl SqliteExecutor<'_>,
    zone_id: i64,
    name: &str,
    rtype: &RecordType,
    content: &str,
) -> sqlx::Result<Option<Record>> {
    let sql = format!(
        r#"
        SELECT {COLUMNS} FROM records
        WHERE zone_id = ? AND name = ? AND type = ? AND content = ? AND deleted_at IS NULL
        ORDER BY id LIMIT 1
        "#
    );
    let row = sqlx::query(&sql)
        .bind(zone_id)
        .bind(name)
        .bind(rtype.as_str())
        .bind(content)
        .fetch_optional(db)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn find_by_name_type(
    db: impl SqliteExecutor<'_>,
    zone_id: i64,
    name: &str,
    rtype: &RecordType,
) -> sqlx::Result<Vec<Record>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM records WHERE zone_id = ? AND name = ? AND type = ? AND deleted_at IS NULL ORDER BY id"
    );
    let rows = sqlx::query(&sql)
        .bind(zone_id)
        .bind(name)
        .bind(rtype.as_str())
        .fetch_all(db)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn update(db: impl SqliteExecutor<'_>, r: &Record) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE records
        SET
            content = ?,
            ttl = ?,
            priority = ?,
            disabled = ?,
            comment = ?,
            external_id = ?,
            provider_data = ?,
            last_synced = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&r.content)
    .bind(r.ttl)
    .bind(r.priority)
    .bind(r.disabled)
    .bind(&r.comment)
    .bind(&r.external_id)
    .bind(Json(&r.provider_data))
    .bind(r.last_synced)
    .bind(Utc::now())
    .bind(r.id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn soft_delete(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<()> {
    let now = Utc::now();
    sqlx::query("UPDATE records SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn soft_delete_for_zone(db: impl SqliteExecutor<'_>, zone_id: i64) -> sqlx::Result<u64> {
    let now = Utc::now();
    let res = sqlx::query(
        "UPDATE records SET deleted_at = ?, updated_at = ? WHERE zone_id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(zone_id)
    .execute(db)
    .await?;
    Ok(res.rows_affected())
}

/// Records of every live zone of a provider.
pub async fn soft_delete_for_provider(
    db: impl SqliteExecutor<'_>,
    provider_id: i64,
) -> sqlx::Result<u64> {
    let now = Utc::now();
    let res = sqlx::query(
        r#"
        UPDATE records SET deleted_at = ?, updated_at = ?
        WHERE deleted_at IS NULL
          AND zone_id IN (SELECT id FROM zones WHERE provider_id = ? AND deleted_at IS NULL)
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(provider_id)
    .execute(db)
    .await?;
    Ok(res.rows_affected())
}

/// Insert-or-update keyed by `(zone_id, name, type, content)`; a soft-deleted row with
/// the same key is revived rather than duplicated.
pub async fn upsert_synced(conn: &mut SqliteConnection, r: &NewRecord) -> sqlx::Result<i64> {
    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT id FROM records
        WHERE zone_id = ? AND name = ? AND type = ? AND content = ?
        ORDER BY deleted_at IS NOT NULL, id DESC
        LIMIT 1
        "#,
    )
    .bind(r.zone_id)
    .bind(&r.name)
    .bind(r.rtype.as_str())
    .bind(&r.content)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((id,)) = existing else {
        return insert(&mut *conn, r).await;
    };

    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE records
        SET
            ttl = ?,
            priority = ?,
            disabled = ?,
            comment = COALESCE(?, comment),
            external_id = ?,
            provider_data = ?,
            last_synced = ?,
            updated_at = ?,
            deleted_at = NULL
        WHERE id = ?
        "#,
    )
    .bind(r.ttl)
    .bind(r.priority)
    .bind(r.disabled)
    .bind(&r.comment)
    .bind(&r.external_id)
    .bind(Json(&r.provider_data))
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(id)
}
