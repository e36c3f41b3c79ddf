//! Reconciliation: pull the backend inventory and make the local cache match it.
//!
//! Only the cache is touched; remote state is never modified here. Each zone is fetched
//! and applied under its zone lock, and every write is an idempotent upsert, so a pass
//! can run alongside live writes and can be repeated freely.
use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::db::zone_repo::{self, NewZone};
use crate::db::{provider_repo, record_repo};
use crate::engine::{in_zone, new_record, zone_provider_data};
use crate::error::AppResult;
use crate::models::{Provider, Zone, ZoneKind};
use crate::provider::{DnsProvider, RemoteRecord, RemoteZone};
use crate::validation::normalize_fqdn;

#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub provider_id: i64,
    pub zone: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub zones_seen: usize,
    pub zones_removed: usize,
    pub records_upserted: usize,
    pub records_removed: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, other: SyncReport) {
        self.zones_seen += other.zones_seen;
        self.zones_removed += other.zones_removed;
        self.records_upserted += other.records_upserted;
        self.records_removed += other.records_removed;
        self.failures.extend(other.failures);
    }
}

/// Sync every zone of one provider. Zones the backend no longer lists are soft-deleted
/// together with their records.
pub async fn sync_provider(state: &AppState, provider_id: i64) -> AppResult<SyncReport> {
    let provider = state.provider(provider_id).await?;
    let client = state.client(&provider)?;
    let remote_zones = client.list_zones().await?;
    info!(provider = %provider.name, zones = remote_zones.len(), "pulled zone inventory");

    let mut report = SyncReport::default();
    let mut seen = HashSet::new();
    for remote in &remote_zones {
        let name = normalize_fqdn(&remote.name);
        seen.insert(name.clone());
        report.zones_seen += 1;
        match pull_zone(state, &provider, client.as_ref(), remote).await {
            Ok(zone_report) => report.absorb(zone_report),
            Err(e) => {
                warn!(provider = %provider.name, zone = %name, error = %e, "zone sync failed");
                report.failures.push(SyncFailure {
                    provider_id,
                    zone: Some(name),
                    error: e.to_string(),
                });
            }
        }
    }

    for zone in zone_repo::list(&state.db, Some(provider_id)).await? {
        if seen.contains(&zone.name) {
            continue;
        }
        let _guard = state.zone_locks.lock(provider_id, &zone.name).await;
        // The inventory was read before this lock; a zone created since then is still live.
        match client.get_zone(zone.remote_id()).await {
            Ok(_) => {
                debug!(zone = %zone.name, "zone appeared during sync; kept");
                continue;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(zone = %zone.name, error = %e, "could not confirm zone removal");
                report.failures.push(SyncFailure {
                    provider_id,
                    zone: Some(zone.name.clone()),
                    error: e.to_string(),
                });
                continue;
            }
        }
        let mut tx = state.db.begin().await?;
        let records = record_repo::soft_delete_for_zone(&mut *tx, zone.id).await?;
        zone_repo::soft_delete(&mut *tx, zone.id).await?;
        tx.commit().await?;
        info!(zone = %zone.name, records, "zone no longer on backend; removed from cache");
        report.zones_removed += 1;
        report.records_removed += records as usize;
    }

    provider_repo::touch_last_sync(&state.db, provider_id).await?;
    info!(
        provider = %provider.name,
        zones_seen = report.zones_seen,
        zones_removed = report.zones_removed,
        records_upserted = report.records_upserted,
        records_removed = report.records_removed,
        failures = report.failures.len(),
        "provider sync finished"
    );
    Ok(report)
}

/// Sync one zone's full record set.
pub async fn sync_zone(state: &AppState, zone_id: i64) -> AppResult<SyncReport> {
    let zone = state.zone(zone_id).await?;
    let provider = state.provider(zone.provider_id).await?;
    let client = state.client(&provider)?;
    let remote = client.get_zone(zone.remote_id()).await?;
    let mut report = pull_zone(state, &provider, client.as_ref(), &remote).await?;
    report.zones_seen = 1;
    Ok(report)
}

/// Sync every active provider; an unreachable provider is reported, not fatal.
pub async fn sync_all(state: &AppState) -> AppResult<SyncReport> {
    let mut report = SyncReport::default();
    for provider in provider_repo::list(&state.db).await? {
        if !provider.active {
            continue;
        }
        match sync_provider(state, provider.id).await {
            Ok(r) => report.absorb(r),
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "provider sync failed");
                report.failures.push(SyncFailure {
                    provider_id: provider.id,
                    zone: None,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

async fn pull_zone(
    state: &AppState,
    provider: &Provider,
    client: &dyn DnsProvider,
    remote: &RemoteZone,
) -> AppResult<SyncReport> {
    let name = normalize_fqdn(&remote.name);
    // Held across the fetch so a concurrent write cannot land between snapshot and apply.
    let _guard = state.zone_locks.lock(provider.id, &name).await;
    let records = client.list_records(&remote.id).await?;

    let existing = zone_repo::find_by_name(&state.db, provider.id, &name).await?;
    let mut tx = state.db.begin().await?;
    let report = apply_zone(&mut *tx, provider.id, &name, remote, existing.as_ref(), &records).await?;
    tx.commit().await?;
    info!(
        zone = %name,
        upserted = report.records_upserted,
        removed = report.records_removed,
        "zone reconciled"
    );
    Ok(report)
}

async fn apply_zone(
    conn: &mut SqliteConnection,
    provider_id: i64,
    name: &str,
    remote: &RemoteZone,
    existing: Option<&Zone>,
    records: &[RemoteRecord],
) -> sqlx::Result<SyncReport> {
    let kind = remote
        .kind
        .or(existing.map(|z| z.kind))
        .unwrap_or(ZoneKind::Native);
    let new_zone = NewZone {
        provider_id,
        name: name.to_string(),
        kind,
        masters: remote.masters.clone(),
        serial: remote
            .serial
            .or(existing.map(|z| z.serial))
            .unwrap_or_default(),
        ttl: existing.map(|z| z.ttl).unwrap_or(3600),
        external_id: Some(remote.id.clone()),
        provider_data: zone_provider_data(remote, existing.map(|z| &z.provider_data)),
    };
    let zone_id = zone_repo::upsert_synced(&mut *conn, &new_zone).await?;

    let mut report = SyncReport::default();
    let mut kept = HashSet::new();
    for r in in_zone(name, records) {
        let id = record_repo::upsert_synced(&mut *conn, &new_record(zone_id, r)).await?;
        kept.insert(id);
        report.records_upserted += 1;
    }
    for stale in record_repo::list(&mut *conn, zone_id).await? {
        if !kept.contains(&stale.id) {
            record_repo::soft_delete(&mut *conn, stale.id).await?;
            report.records_removed += 1;
        }
    }

    if let Some(mut zone) = zone_repo::find(&mut *conn, zone_id).await? {
        zone.dnssec_enabled = remote.dnssec || zone.dnssec_state.is_enabled();
        zone.last_synced = Some(Utc::now());
        zone_repo::update(&mut *conn, &zone).await?;
    }
    Ok(report)
}
