//! Rows of the `providers` table.
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Row, SqliteExecutor};

use crate::db::decode_error;
use crate::models::{ConnectionConfig, Provider, ProviderType, RateLimitPolicy};

const COLUMNS: &str = r#"
    id, name, type, active, connection_config, max_attempts, base_delay_ms,
    timeout_secs, last_sync, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct NewProvider {
    pub name: String,
    pub provider_type: ProviderType,
    pub connection: ConnectionConfig,
    pub policy: RateLimitPolicy,
}

fn from_row(row: &SqliteRow) -> sqlx::Result<Provider> {
    let provider_type: String = row.try_get("type")?;
    let Json(connection) = row.try_get::<Json<ConnectionConfig>, _>("connection_config")?;
    Ok(Provider {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        provider_type: provider_type
            .parse()
            .map_err(|e: String| decode_error("type", e))?,
        active: row.try_get("active")?,
        connection,
        policy: RateLimitPolicy {
            max_attempts: row.try_get("max_attempts")?,
            base_delay_ms: row.try_get::<i64, _>("base_delay_ms")?.max(0) as u64,
            timeout_secs: row.try_get::<i64, _>("timeout_secs")?.max(1) as u64,
        },
        last_sync: row.try_get("last_sync")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

pub async fn insert(db: impl SqliteExecutor<'_>, p: &NewProvider) -> sqlx::Result<i64> {
    let now = Utc::now();
    let res = sqlx::query(
        r#"
        INSERT INTO providers (
            name, type, active, connection_config, max_attempts, base_delay_ms,
            timeout_secs, created_at, updated_at
        ) VALUES (?, ?, 1, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&p.name)
    .bind(p.provider_type.as_str())
    .bind(Json(&p.connection))
    .bind(p.policy.max_attempts)
    .bind(p.policy.base_delay_ms as i64)
    .bind(p.policy.timeout_secs as i64)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn find(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<Option<Provider>> {
    let sql = format!("SELECT {COLUMNS} FROM providers WHERE id = ? AND deleted_at IS NULL");
    let row = sqlx::query(&sql).bind(id).fetch_optional(db).await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn find_by_name(
    db: impl SqliteExecutor<'_>,
    name: &str,
) -> sqlx::Result<Option<Provider>> {
    let sql = format!("SELECT {COLUMNS} FROM providers WHERE name = ? AND deleted_at IS NULL");
    let row = sqlx::query(&sql).bind(name).fetch_optional(db).await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn list(db: impl SqliteExecutor<'_>) -> sqlx::Result<Vec<Provider>> {
    let sql = format!("SELECT {COLUMNS} FROM providers WHERE deleted_at IS NULL ORDER BY name");
    let rows = sqlx::query(&sql).fetch_all(db).await?;
    rows.iter().map(from_row).collect()
}

/// Writes name, active flag, connection config and policy.
pub async fn update(db: impl SqliteExecutor<'_>, p: &Provider) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE providers
        SET
            name = ?,
            active = ?,
            connection_config = ?,
            max_attempts = ?,
            base_delay_ms = ?,
            timeout_secs = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&p.name)
    .bind(p.active)
    .bind(Json(&p.connection))
    .bind(p.policy.max_attempts)
    .bind(p.policy.base_delay_ms as i64)
    .bind(p.policy.timeout_secs as i64)
    .bind(Utc::now())
    .bind(p.id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn touch_last_sync(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<()> {
    let now = Utc::now();
    sqlx::query("UPDATE providers SET last_sync = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn soft_delete(db: impl SqliteExecutor<'_>, id: i64) -> sqlx::Result<()> {
    let now = Utc::now();
    sqlx::query("UPDATE providers SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    fn new_provider(name: &str) -> NewProvider {
        NewProvider {
            name: name.into(),
            provider_type: ProviderType::PowerDns,
            connection: ConnectionConfig {
                endpoint: Some("http://127.0.0.1:8081/api/v1".into()),
                api_key: Some("secret".into()),
                ..Default::default()
            },
            policy: RateLimitPolicy::default(),
        }
    }

    #[tokio::test]
    async fn insert_find_and_soft_delete() {
        let db = connect_memory().await.unwrap();
        let id = insert(&db, &new_provider("pdns-main")).await.unwrap();

        let p = find(&db, id).await.unwrap().unwrap();
        assert_eq!(p.provider_type, ProviderType::PowerDns);
        assert_eq!(p.connection.api_key.as_deref(), Some("secret"));
        assert!(p.active);
        assert_eq!(p.policy, RateLimitPolicy::default());

        soft_delete(&db, id).await.unwrap();
        assert!(find(&db, id).await.unwrap().is_none());
        assert!(list(&db).await.unwrap().is_empty());

        // the name is free again once the old row is deleted
        insert(&db, &new_provider("pdns-main")).await.unwrap();
    }

    #[tokio::test]
    async fn live_names_are_unique() {
        let db = connect_memory().await.unwrap();
        insert(&db, &new_provider("dup")).await.unwrap();
        assert!(insert(&db, &new_provider("dup")).await.is_err());
    }
}
