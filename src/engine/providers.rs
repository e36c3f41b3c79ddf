//! Provider administration. Providers live only in the local store; nothing here
//! writes to a backend.
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::AppState;
use crate::db::provider_repo::{self, NewProvider};
use crate::db::{record_repo, zone_repo};
use crate::error::{AppError, AppResult};
use crate::models::{ConnectionConfig, Provider, ProviderType, RateLimitPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub policy: Option<RateLimitPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderPatch {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub connection: Option<ConnectionConfig>,
    pub policy: Option<RateLimitPolicy>,
}

/// What happens to a provider's live zones when it is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Refuse,
    Cascade,
    Reassign(i64),
    Force,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub provider_id: i64,
    pub ok: bool,
    pub message: String,
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("provider name must not be empty"));
    }
    if name.len() > 64 {
        return Err(AppError::validation("provider name is longer than 64 characters"));
    }
    Ok(name.to_string())
}

/// Build a client for a provider without persisting it; catches missing credentials.
fn check_client(state: &AppState, provider: &Provider) -> AppResult<()> {
    state.registry.build(provider, &state.deps).map(|_| ())
}

pub async fn list_providers(state: &AppState) -> AppResult<Vec<Provider>> {
    Ok(provider_repo::list(&state.db).await?)
}

pub async fn create_provider(state: &AppState, req: ProviderRequest) -> AppResult<Provider> {
    let name = validate_name(&req.name)?;
    if !state.registry.supports(req.provider_type) {
        return Err(AppError::configuration(format!(
            "provider type '{}' is not implemented",
            req.provider_type
        )));
    }
    let now = Utc::now();
    let candidate = Provider {
        id: 0,
        name: name.clone(),
        provider_type: req.provider_type,
        active: true,
        connection: req.connection.clone(),
        policy: req.policy.unwrap_or_default(),
        last_sync: None,
        created_at: now,
        updated_at: now,
    };
    check_client(state, &candidate)?;

    if provider_repo::find_by_name(&state.db, &name).await?.is_some() {
        return Err(AppError::AlreadyExists(format!("provider {name}")));
    }
    let id = provider_repo::insert(
        &state.db,
        &NewProvider {
            name,
            provider_type: candidate.provider_type,
            connection: candidate.connection,
            policy: candidate.policy,
        },
    )
    .await?;
    info!(provider_id = id, provider_type = %req.provider_type, "provider created");
    state.provider(id).await
}

pub async fn update_provider(
    state: &AppState,
    provider_id: i64,
    patch: ProviderPatch,
) -> AppResult<Provider> {
    let mut provider = state.provider(provider_id).await?;
    if let Some(name) = patch.name {
        let name = validate_name(&name)?;
        if name != provider.name {
            if let Some(other) = provider_repo::find_by_name(&state.db, &name).await? {
                return Err(AppError::AlreadyExists(format!(
                    "provider {} (id {})",
                    other.name, other.id
                )));
            }
            provider.name = name;
        }
    }
    if let Some(active) = patch.active {
        provider.active = active;
    }
    if let Some(connection) = patch.connection {
        provider.connection = connection;
    }
    if let Some(policy) = patch.policy {
        provider.policy = policy;
    }
    check_client(state, &provider)?;

    provider_repo::update(&state.db, &provider).await?;
    info!(provider_id, name = %provider.name, active = provider.active, "provider updated");
    state.provider(provider_id).await
}

pub async fn delete_provider(state: &AppState, provider_id: i64, mode: DeleteMode) -> AppResult<()> {
    let provider = state.provider(provider_id).await?;
    let live = zone_repo::count_live_for_provider(&state.db, provider_id).await?;

    if let DeleteMode::Reassign(to) = mode {
        if to == provider_id {
            return Err(AppError::validation("cannot reassign zones to the same provider"));
        }
        state.provider(to).await?;
    }
    if mode == DeleteMode::Refuse && live > 0 {
        return Err(AppError::conflict(format!(
            "provider '{}' still has {live} zone(s)",
            provider.name
        )));
    }

    let mut tx = state.db.begin().await?;
    match mode {
        DeleteMode::Cascade => {
            let records = record_repo::soft_delete_for_provider(&mut *tx, provider_id).await?;
            let zones = zone_repo::soft_delete_for_provider(&mut *tx, provider_id).await?;
            info!(provider_id, zones, records, "cascaded provider removal");
        }
        DeleteMode::Reassign(to) => {
            let moved = zone_repo::reassign(&mut *tx, provider_id, to).await?;
            info!(provider_id, to, moved, "zones reassigned");
        }
        DeleteMode::Force if live > 0 => {
            warn!(provider_id, live, "removing provider that still owns zones");
        }
        _ => {}
    }
    provider_repo::soft_delete(&mut *tx, provider_id).await?;
    tx.commit().await?;
    info!(provider_id, name = %provider.name, ?mode, "provider deleted");
    Ok(())
}

pub async fn test_provider(state: &AppState, provider_id: i64) -> AppResult<ConnectionTest> {
    let provider = state.provider(provider_id).await?;
    let client = state.registry.build(&provider, &state.deps)?;
    let result = client.test_connection().await;
    let (ok, message) = match result {
        Ok(()) => (true, "connection ok".to_string()),
        Err(e) => {
            warn!(provider_id, error = %e, "connection test failed");
            (false, e.to_string())
        }
    };
    Ok(ConnectionTest {
        provider_id,
        ok,
        message,
    })
}
