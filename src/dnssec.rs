//! DNSSEC lifecycle per zone.
//!
//! ```text
//! disabled -> enabling -> keys_pending -> keys_active <-> rollover_in_progress
//! keys_* -> disabling -> disabled
//! ```
//!
//! Backends that hold their own keys go straight from `enabling` to `keys_active`.
//! Self-managed backends need a KSK and a ZSK generated before DS records exist.
//! Rollover is always an explicit, confirmed call and never deletes the old key.
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::AppState;
use crate::db::zone_repo;
use crate::error::{AppError, AppResult};
use crate::fcrdns::LookupError;
use crate::models::{DnssecKey, DnssecState, KeyType, Zone};
use crate::provider::{DnsProvider, DnssecMode, KeyRequest, ProviderError};

async fn save(state: &AppState, zone: &Zone) -> AppResult<()> {
    zone_repo::update(&state.db, zone).await?;
    Ok(())
}

fn set_state(zone: &mut Zone, next: DnssecState) {
    info!(zone = %zone.name, from = %zone.dnssec_state, to = %next, "dnssec state");
    zone.dnssec_state = next;
    zone.dnssec_enabled = next.is_enabled();
}

/// Merge freshly listed keys with the mirror, keeping the first time each key was seen.
pub(crate) fn mirror_keys(
    previous: &[DnssecKey],
    fresh: Vec<DnssecKey>,
    now: DateTime<Utc>,
) -> Vec<DnssecKey> {
    fresh
        .into_iter()
        .map(|mut key| {
            let seen = previous
                .iter()
                .find(|p| p.id == key.id)
                .and_then(|p| p.created_at);
            key.created_at = seen.or(key.created_at).or(Some(now));
            key
        })
        .collect()
}

fn self_managed(client: &dyn DnsProvider) -> AppResult<()> {
    match client.capabilities().dnssec {
        DnssecMode::SelfManaged => Ok(()),
        DnssecMode::ProviderManaged => Err(AppError::Conflict(
            "keys are managed by the backend for this zone".into(),
        )),
        DnssecMode::Unsupported => Err(ProviderError::Unsupported("DNSSEC").into()),
    }
}

pub async fn enable(state: &AppState, zone_id: i64) -> AppResult<Zone> {
    let zone = state.zone(zone_id).await?;
    let client = state.client_for_zone(&zone).await?;
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut zone = state.zone(zone_id).await?;
    enable_locked(state, client.as_ref(), &mut zone).await?;
    Ok(zone)
}

/// Enable signing on a zone whose lock the caller already holds. When the backend
/// refuses, the previous state is restored before the error is returned.
pub(crate) async fn enable_locked(
    state: &AppState,
    client: &dyn DnsProvider,
    zone: &mut Zone,
) -> AppResult<()> {
    if client.capabilities().dnssec == DnssecMode::Unsupported {
        return Err(ProviderError::Unsupported("DNSSEC").into());
    }
    if zone.dnssec_state.is_enabled() {
        return Ok(());
    }
    let previous = zone.dnssec_state;
    set_state(zone, DnssecState::Enabling);
    save(state, zone).await?;

    let status = match client.enable_dnssec(zone.remote_id()).await {
        Ok(status) => status,
        Err(e) => {
            warn!(zone = %zone.name, error = %e, "enabling DNSSEC failed");
            set_state(zone, previous);
            save(state, zone).await?;
            return Err(e.into());
        }
    };
    let now = Utc::now();
    zone.provider_data.dnssec_keys = mirror_keys(&zone.provider_data.dnssec_keys, status.keys, now);

    match client.capabilities().dnssec {
        DnssecMode::ProviderManaged => {
            zone.provider_data.dnssec_managed = true;
            set_state(zone, DnssecState::KeysActive);
        }
        _ => {
            set_state(zone, DnssecState::KeysPending);
            save(state, zone).await?;
            if !has_active(&zone.provider_data.dnssec_keys, KeyType::Ksk)
                || !has_active(&zone.provider_data.dnssec_keys, KeyType::Zsk)
            {
                generate_locked(state, client, zone, state.config.dnssec.default_algorithm).await?;
            }
            set_state(zone, DnssecState::KeysActive);
        }
    }
    save(state, zone).await
}

fn has_active(keys: &[DnssecKey], key_type: KeyType) -> bool {
    keys.iter()
        .any(|k| k.active && (k.key_type == key_type || k.key_type == KeyType::Csk))
}

/// Generate a KSK and a ZSK. A role that already has an active key gets its new key
/// inactive, ready for rollover.
async fn generate_locked(
    state: &AppState,
    client: &dyn DnsProvider,
    zone: &mut Zone,
    algorithm: &str,
) -> AppResult<Vec<DnssecKey>> {
    let mut created = Vec::new();
    for key_type in [KeyType::Ksk, KeyType::Zsk] {
        let req = KeyRequest {
            key_type,
            algorithm: algorithm.to_string(),
            bits: None,
            active: !has_active(&zone.provider_data.dnssec_keys, key_type),
        };
        let key = client.generate_key(zone.remote_id(), &req).await?;
        info!(zone = %zone.name, key_id = %key.id, %key_type, active = key.active, "key generated");
        created.push(key);
    }
    refresh_keys(client, zone).await?;
    save(state, zone).await?;
    Ok(created)
}

async fn refresh_keys(client: &dyn DnsProvider, zone: &mut Zone) -> AppResult<()> {
    let fresh = client.list_keys(zone.remote_id()).await?;
    zone.provider_data.dnssec_keys = mirror_keys(&zone.provider_data.dnssec_keys, fresh, Utc::now());
    Ok(())
}

pub async fn generate_keys(
    state: &AppState,
    zone_id: i64,
    algorithm: Option<&str>,
) -> AppResult<Vec<DnssecKey>> {
    let zone = state.zone(zone_id).await?;
    let client = state.client_for_zone(&zone).await?;
    self_managed(client.as_ref())?;
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut zone = state.zone(zone_id).await?;
    if !zone.dnssec_state.is_enabled() {
        return Err(AppError::conflict(format!("DNSSEC is not enabled on {}", zone.name)));
    }
    let algorithm = algorithm.unwrap_or(state.config.dnssec.default_algorithm);
    let created = generate_locked(state, client.as_ref(), &mut zone, algorithm).await?;
    if zone.dnssec_state == DnssecState::KeysPending {
        set_state(&mut zone, DnssecState::KeysActive);
        save(state, &zone).await?;
    }
    Ok(created)
}

pub async fn activate_key(state: &AppState, zone_id: i64, key_id: &str) -> AppResult<DnssecKey> {
    let zone = state.zone(zone_id).await?;
    let client = state.client_for_zone(&zone).await?;
    self_managed(client.as_ref())?;
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut zone = state.zone(zone_id).await?;

    client.set_key_active(zone.remote_id(), key_id, true).await?;
    refresh_keys(client.as_ref(), &mut zone).await?;
    if zone.dnssec_state == DnssecState::KeysPending {
        set_state(&mut zone, DnssecState::KeysActive);
    }
    save(state, &zone).await?;
    zone.provider_data
        .dnssec_keys
        .iter()
        .find(|k| k.id == key_id)
        .cloned()
        .ok_or_else(|| AppError::not_found(format!("key {key_id} on {}", zone.name)))
}

#[derive(Debug, Clone, Serialize)]
pub struct RolloverReport {
    pub zone: String,
    pub key_type: KeyType,
    pub new_key: DnssecKey,
    /// Deactivated, still present on the backend.
    pub retired: Vec<String>,
}

/// Activate a fresh key of `key_type` and deactivate the previous ones.
pub async fn rollover(
    state: &AppState,
    zone_id: i64,
    key_type: KeyType,
    confirmed: bool,
) -> AppResult<RolloverReport> {
    if !confirmed {
        return Err(AppError::validation("key rollover must be confirmed explicitly"));
    }
    let zone = state.zone(zone_id).await?;
    let client = state.client_for_zone(&zone).await?;
    self_managed(client.as_ref())?;
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut zone = state.zone(zone_id).await?;
    if zone.dnssec_state != DnssecState::KeysActive {
        return Err(AppError::conflict(format!(
            "rollover needs active keys; {} is {}",
            zone.name, zone.dnssec_state
        )));
    }

    refresh_keys(client.as_ref(), &mut zone).await?;
    let old: Vec<DnssecKey> = zone
        .provider_data
        .dnssec_keys
        .iter()
        .filter(|k| k.active && k.key_type == key_type)
        .cloned()
        .collect();
    let algorithm = old
        .first()
        .map(|k| k.algorithm.clone())
        .unwrap_or_else(|| state.config.dnssec.default_algorithm.to_string());

    set_state(&mut zone, DnssecState::RolloverInProgress);
    save(state, &zone).await?;

    let result = async {
        let req = KeyRequest {
            key_type,
            algorithm,
            bits: None,
            active: false,
        };
        let new_key = client.generate_key(zone.remote_id(), &req).await?;
        client.set_key_active(zone.remote_id(), &new_key.id, true).await?;
        for key in &old {
            client.set_key_active(zone.remote_id(), &key.id, false).await?;
        }
        Ok::<_, ProviderError>(new_key)
    }
    .await;

    let new_key = match result {
        Ok(key) => key,
        Err(e) => {
            // Left in rollover_in_progress so the operator can inspect the key set.
            error!(zone = %zone.name, %key_type, error = %e, "rollover failed midway");
            return Err(e.into());
        }
    };
    refresh_keys(client.as_ref(), &mut zone).await?;
    set_state(&mut zone, DnssecState::KeysActive);
    save(state, &zone).await?;

    let new_key = zone
        .provider_data
        .dnssec_keys
        .iter()
        .find(|k| k.id == new_key.id)
        .cloned()
        .unwrap_or(new_key);
    info!(zone = %zone.name, %key_type, new_key = %new_key.id, retired = old.len(), "rollover done");
    Ok(RolloverReport {
        zone: zone.name.clone(),
        key_type,
        new_key,
        retired: old.into_iter().map(|k| k.id).collect(),
    })
}

pub async fn disable(state: &AppState, zone_id: i64) -> AppResult<Zone> {
    let zone = state.zone(zone_id).await?;
    let client = state.client_for_zone(&zone).await?;
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut zone = state.zone(zone_id).await?;
    disable_locked(state, client.as_ref(), &mut zone).await?;
    Ok(zone)
}

/// Counterpart of [`enable_locked`]; a refused disable leaves the zone as it was.
pub(crate) async fn disable_locked(
    state: &AppState,
    client: &dyn DnsProvider,
    zone: &mut Zone,
) -> AppResult<()> {
    if zone.dnssec_state == DnssecState::Disabled {
        return Ok(());
    }
    let previous = zone.dnssec_state;
    set_state(zone, DnssecState::Disabling);
    save(state, zone).await?;

    if let Err(e) = client.disable_dnssec(zone.remote_id()).await {
        warn!(zone = %zone.name, error = %e, "disabling DNSSEC failed");
        set_state(zone, previous);
        save(state, zone).await?;
        return Err(e.into());
    }
    zone.provider_data.dnssec_keys.clear();
    zone.provider_data.dnssec_managed = false;
    set_state(zone, DnssecState::Disabled);
    save(state, zone).await
}

/// Keys as the backend reports them now; the local mirror is refreshed on the way.
pub async fn list_keys(state: &AppState, zone_id: i64) -> AppResult<Vec<DnssecKey>> {
    let zone = state.zone(zone_id).await?;
    let client = state.client_for_zone(&zone).await?;
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut zone = state.zone(zone_id).await?;
    refresh_keys(client.as_ref(), &mut zone).await?;
    save(state, &zone).await?;
    Ok(zone.provider_data.dnssec_keys)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnssecCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnssecValidation {
    pub zone: String,
    pub status: CheckStatus,
    pub checks: Vec<DnssecCheck>,
}

impl DnssecValidation {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

fn overall(checks: &[DnssecCheck]) -> CheckStatus {
    if checks.iter().all(|c| c.status == CheckStatus::Pass) {
        CheckStatus::Pass
    } else if checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Fail | CheckStatus::Error))
    {
        CheckStatus::Fail
    } else {
        CheckStatus::Warn
    }
}

fn lookup_check(
    name: &'static str,
    result: Result<Vec<String>, LookupError>,
    what: &str,
) -> DnssecCheck {
    let (status, message) = match result {
        Ok(found) if !found.is_empty() => (CheckStatus::Pass, format!("{} {what} found", found.len())),
        Ok(_) | Err(LookupError::NotFound) => (CheckStatus::Fail, format!("no {what} found")),
        Err(LookupError::Failed(e)) => (CheckStatus::Error, e),
    };
    DnssecCheck {
        name,
        status,
        message,
    }
}

/// Oldest active key against the configured lifetime.
pub(crate) fn key_age_check(
    keys: &[DnssecKey],
    lifetime_days: i64,
    warning_days: i64,
    now: DateTime<Utc>,
) -> DnssecCheck {
    let oldest = keys
        .iter()
        .filter(|k| k.active)
        .filter_map(|k| k.created_at.map(|at| (k, at)))
        .min_by_key(|(_, at)| *at);
    let (status, message) = match oldest {
        None => (CheckStatus::Warn, "no active key with a known age".to_string()),
        Some((key, at)) => {
            let expires = at + Duration::days(lifetime_days);
            let left = (expires - now).num_days();
            if now >= expires {
                (CheckStatus::Fail, format!("{} key {} is past its lifetime", key.key_type, key.id))
            } else if left <= warning_days {
                (
                    CheckStatus::Warn,
                    format!("{} key {} reaches its lifetime in {left} days", key.key_type, key.id),
                )
            } else {
                (CheckStatus::Pass, format!("oldest active key expires in {left} days"))
            }
        }
    };
    DnssecCheck {
        name: "key_age",
        status,
        message,
    }
}

/// Read-only diagnostic pass. Only `last_check` is written back.
pub async fn validate(state: &AppState, zone_id: i64) -> AppResult<DnssecValidation> {
    let mut zone = state.zone(zone_id).await?;
    let lookup = state.lookup.as_ref();
    let mut checks = vec![
        lookup_check("ds", lookup.lookup_records(&zone.name, "DS").await, "DS records in parent"),
        lookup_check("dnskey", lookup.lookup_records(&zone.name, "DNSKEY").await, "DNSKEY records"),
        lookup_check("rrsig", lookup.lookup_records(&zone.name, "RRSIG").await, "RRSIG records"),
    ];
    let nsec = match lookup.lookup_records(&zone.name, "NSEC").await {
        Ok(found) if !found.is_empty() => Ok(found),
        _ => lookup.lookup_records(&zone.name, "NSEC3PARAM").await,
    };
    checks.push(lookup_check("nsec", nsec, "NSEC/NSEC3 records"));
    checks.push(key_age_check(
        &zone.provider_data.dnssec_keys,
        state.config.dnssec.key_lifetime_days,
        state.config.dnssec.rollover_warning_days,
        Utc::now(),
    ));

    let report = DnssecValidation {
        zone: zone.name.clone(),
        status: overall(&checks),
        checks,
    };
    info!(zone = %zone.name, status = ?report.status, "dnssec validated");
    zone.last_check = Some(Utc::now());
    save(state, &zone).await?;
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkResult {
    pub zone_id: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<DnssecState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Enable each zone independently; one failure does not stop the rest.
pub async fn enable_many(state: &AppState, zone_ids: &[i64]) -> Vec<BulkResult> {
    let mut results = Vec::with_capacity(zone_ids.len());
    for &zone_id in zone_ids {
        let result = match enable(state, zone_id).await {
            Ok(zone) => BulkResult {
                zone_id,
                ok: true,
                state: Some(zone.dnssec_state),
                error: None,
            },
            Err(e) => {
                warn!(zone_id, error = %e, "bulk dnssec enable failed for zone");
                BulkResult {
                    zone_id,
                    ok: false,
                    state: None,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }
    results
}
