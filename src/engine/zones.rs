use anyhow::anyhow;
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::db::zone_repo::{self, NewZone};
use crate::db::{Db, record_repo};
use crate::dnssec;
use crate::engine::{
    Divergence, SideEffect, WriteOutcome, bump_serial_or_warn, echo, in_zone, new_record,
    store_serial, zone_provider_data,
};
use crate::error::{AppError, AppResult};
use crate::models::{Zone, ZoneKind};
use crate::provider::{DnsProvider, RemoteRecord, ZoneSpec, ZoneUpdate};
use crate::serial::{initial_serial, today};
use crate::validation::{normalize_fqdn, validate_fqdn, validate_masters, validate_ttl};

fn default_kind() -> ZoneKind {
    ZoneKind::Native
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneRequest {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: ZoneKind,
    #[serde(default)]
    pub masters: Vec<String>,
    /// Falls back to the configured default nameservers.
    #[serde(default)]
    pub nameservers: Option<Vec<String>>,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub soa_contact: Option<String>,
    #[serde(default)]
    pub auto_dnssec: bool,
}

impl ZoneRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ZoneKind::Native,
            masters: Vec::new(),
            nameservers: None,
            ttl: None,
            soa_contact: None,
            auto_dnssec: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZonePatch {
    pub kind: Option<ZoneKind>,
    pub masters: Option<Vec<String>>,
    pub ttl: Option<u32>,
    pub auto_dnssec: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeleteZoneOptions {
    #[serde(default)]
    pub skip_remote: bool,
}

pub async fn list_zones(state: &AppState, provider_id: Option<i64>) -> AppResult<Vec<Zone>> {
    Ok(zone_repo::list(&state.db, provider_id).await?)
}

pub async fn get_zone(state: &AppState, zone_id: i64) -> AppResult<Zone> {
    state.zone(zone_id).await
}

pub async fn create_zone(
    state: &AppState,
    provider_id: i64,
    req: ZoneRequest,
) -> AppResult<WriteOutcome<Zone>> {
    let provider = state.provider(provider_id).await?;
    let name = normalize_fqdn(&req.name);
    validate_fqdn(&name)?;
    validate_masters(req.kind, &req.masters)?;
    let ttl = req.ttl.unwrap_or(state.config.default_ttl);
    validate_ttl(ttl)?;
    let nameservers = req
        .nameservers
        .clone()
        .unwrap_or_else(|| state.config.default_nameservers.clone())
        .iter()
        .map(|ns| {
            let ns = normalize_fqdn(ns);
            validate_fqdn(&ns).map(|_| ns)
        })
        .collect::<Result<Vec<_>, _>>()?;
    let client = state.client(&provider)?;

    let guard = state.zone_locks.lock(provider_id, &name).await;
    if zone_repo::find_by_name(&state.db, provider_id, &name)
        .await?
        .is_some()
    {
        return Err(AppError::AlreadyExists(format!("zone {name}")));
    }

    let spec = ZoneSpec {
        soa_contact: req
            .soa_contact
            .as_deref()
            .map(normalize_fqdn)
            .unwrap_or_else(|| state.config.soa_contact_for(&name)),
        name,
        kind: req.kind,
        masters: req.masters.clone(),
        nameservers,
        ttl,
        serial: initial_serial(today()),
    };
    info!(provider = %provider.name, zone = %spec.name, kind = %spec.kind, "creating zone");
    let remote = client.create_zone(&spec).await?;
    let mut outcome = WriteOutcome::new(echo(&remote));

    let records = match client.list_records(&remote.id).await {
        Ok(records) => records,
        Err(e) => {
            outcome.warn(format!(
                "records of new zone {} not fetched ({e}); next sync fills them in",
                spec.name
            ));
            Vec::new()
        }
    };

    let new_zone = NewZone {
        provider_id,
        name: spec.name.clone(),
        kind: spec.kind,
        masters: spec.masters.clone(),
        serial: remote.serial.unwrap_or(spec.serial),
        ttl,
        external_id: Some(remote.id.clone()),
        provider_data: zone_provider_data(&remote, None),
    };
    match commit_new_zone(&state.db, &new_zone, &records).await {
        Ok(zone) => {
            info!(zone = %zone.name, zone_id = zone.id, "zone created");
            outcome.local = Some(zone);
        }
        Err(e) => {
            outcome.divergence = Some(Divergence::record(
                "create_zone",
                spec.name.clone(),
                Some(remote.id.clone()),
                e,
            ));
        }
    }

    // The flag is stored only once the backend is actually signing the zone.
    if req.auto_dnssec {
        if let Some(mut zone) = outcome.local.take() {
            match dnssec::enable_locked(state, client.as_ref(), &mut zone).await {
                Ok(()) => {
                    zone.auto_dnssec = true;
                    match zone_repo::update(&state.db, &zone).await {
                        Ok(()) => outcome.side_effects.push(SideEffect::DnssecEnabled {
                            zone: zone.name.clone(),
                        }),
                        Err(e) => {
                            outcome.divergence = Some(Divergence::record(
                                "create_zone",
                                zone.name.clone(),
                                zone.external_id.clone(),
                                e,
                            ));
                        }
                    }
                }
                Err(e) => outcome.warn(format!(
                    "DNSSEC not enabled on {}, auto_dnssec left off: {e}",
                    zone.name
                )),
            }
            outcome.local = Some(zone);
        }
    }
    drop(guard);
    Ok(outcome)
}

async fn commit_new_zone(db: &Db, z: &NewZone, records: &[RemoteRecord]) -> AppResult<Zone> {
    let mut tx = db.begin().await?;
    let id = zone_repo::insert(&mut *tx, z).await?;
    for r in in_zone(&z.name, records) {
        record_repo::insert(&mut *tx, &new_record(id, r)).await?;
    }
    let zone = zone_repo::find(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow!("zone {id} missing after insert")))?;
    tx.commit().await?;
    Ok(zone)
}

/// Bring the backend's signing in line with a changed `auto_dnssec` flag. Switching the
/// flag on enables DNSSEC; switching it off disables DNSSEC only when the flag had been
/// on. Returns the zone with its DNSSEC fields updated, or `None` when nothing changed.
async fn apply_auto_dnssec(
    state: &AppState,
    client: &dyn DnsProvider,
    zone: &Zone,
    auto: bool,
) -> AppResult<Option<Zone>> {
    let mut signed = zone.clone();
    match (auto, zone.dnssec_state.is_enabled()) {
        (true, false) => dnssec::enable_locked(state, client, &mut signed).await?,
        (false, true) if zone.auto_dnssec => {
            dnssec::disable_locked(state, client, &mut signed).await?
        }
        _ => return Ok(None),
    }
    Ok(Some(signed))
}

fn copy_dnssec(into: &mut Zone, from: &Zone) {
    into.dnssec_state = from.dnssec_state;
    into.dnssec_enabled = from.dnssec_enabled;
    into.provider_data.dnssec_keys = from.provider_data.dnssec_keys.clone();
    into.provider_data.dnssec_managed = from.provider_data.dnssec_managed;
}

/// Remote first for kind, masters and ttl. A change of `auto_dnssec` is applied to the
/// backend's signing before the flag is stored; when that fails the flag keeps its old
/// value.
pub async fn update_zone(
    state: &AppState,
    zone_id: i64,
    patch: ZonePatch,
) -> AppResult<WriteOutcome<Zone>> {
    let zone = state.zone(zone_id).await?;
    let client = state.client_for_zone(&zone).await?;
    let guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let zone = state.zone(zone_id).await?;

    let kind = patch.kind.unwrap_or(zone.kind);
    let masters = match (&patch.masters, kind) {
        (Some(masters), _) => masters.clone(),
        (None, ZoneKind::Secondary) => zone.masters.clone(),
        (None, _) => Vec::new(),
    };
    validate_masters(kind, &masters)?;
    if let Some(ttl) = patch.ttl {
        validate_ttl(ttl)?;
    }

    let update = ZoneUpdate {
        kind: (kind != zone.kind).then_some(kind),
        masters: (masters != zone.masters).then(|| masters.clone()),
        ttl: patch.ttl.filter(|t| *t != zone.ttl),
    };

    let mut outcome = WriteOutcome::new(None);
    let mut updated = zone.clone();
    let mut serial = None;
    let mut remote_changed = !update.is_empty();
    if !update.is_empty() {
        let remote = client.update_zone(zone.remote_id(), &update).await?;
        outcome.remote = echo(&remote);
        updated.provider_data = zone_provider_data(&remote, Some(&zone.provider_data));
        if update.ttl.is_some() {
            serial = bump_serial_or_warn(client.as_ref(), &zone, &mut outcome).await;
        }
    }
    updated.kind = kind;
    updated.masters = masters;
    updated.ttl = patch.ttl.unwrap_or(zone.ttl);
    if let Some(auto) = patch.auto_dnssec {
        match apply_auto_dnssec(state, client.as_ref(), &zone, auto).await {
            Ok(signed) => {
                if let Some(signed) = signed {
                    copy_dnssec(&mut updated, &signed);
                    remote_changed = true;
                    outcome.side_effects.push(if auto {
                        SideEffect::DnssecEnabled { zone: zone.name.clone() }
                    } else {
                        SideEffect::DnssecDisabled { zone: zone.name.clone() }
                    });
                }
                updated.auto_dnssec = auto;
            }
            Err(e) if update.is_empty() => return Err(e),
            Err(e) => {
                // Keep whatever state the failed attempt persisted.
                if let Ok(Some(current)) = zone_repo::find(&state.db, zone_id).await {
                    copy_dnssec(&mut updated, &current);
                }
                outcome.warn(format!("auto_dnssec left unchanged: {e}"));
            }
        }
    }

    let committed = async {
        let mut tx = state.db.begin().await?;
        zone_repo::update(&mut *tx, &updated).await?;
        if let Some(serial) = serial {
            store_serial(&mut *tx, &updated, serial).await?;
        }
        let stored = zone_repo::find(&mut *tx, zone_id).await?;
        tx.commit().await?;
        Ok::<_, sqlx::Error>(stored)
    }
    .await;

    match committed {
        Ok(stored) => {
            info!(zone = %zone.name, ?update, "zone updated");
            outcome.local = stored;
        }
        Err(e) if !remote_changed => return Err(e.into()),
        Err(e) => {
            outcome.divergence = Some(Divergence::record(
                "update_zone",
                zone.name.clone(),
                zone.external_id.clone(),
                e,
            ));
        }
    }
    drop(guard);
    Ok(outcome)
}

/// Soft-deletes the zone and all of its records locally.
pub async fn delete_zone(
    state: &AppState,
    zone_id: i64,
    opts: DeleteZoneOptions,
) -> AppResult<WriteOutcome<Zone>> {
    let zone = state.zone(zone_id).await?;
    let client = if opts.skip_remote {
        None
    } else {
        Some(state.client_for_zone(&zone).await?)
    };
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut outcome = WriteOutcome::new(None);

    if let Some(client) = client {
        match client.delete_zone(zone.remote_id()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                outcome.warn(format!("{} was already absent remotely", zone.name));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let committed = async {
        let mut tx = state.db.begin().await?;
        let removed = record_repo::soft_delete_for_zone(&mut *tx, zone.id).await?;
        zone_repo::soft_delete(&mut *tx, zone.id).await?;
        tx.commit().await?;
        Ok::<_, sqlx::Error>(removed)
    }
    .await;

    match committed {
        Ok(records) => info!(zone = %zone.name, records, skip_remote = opts.skip_remote, "zone deleted"),
        Err(e) if opts.skip_remote => return Err(e.into()),
        Err(e) => {
            outcome.divergence = Some(Divergence::record(
                "delete_zone",
                zone.name.clone(),
                zone.external_id.clone(),
                e,
            ));
        }
    }
    Ok(outcome)
}
