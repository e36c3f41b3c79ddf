//! Record mutations, including the derived PTR side effects of A/AAAA changes.
use std::net::IpAddr;

use anyhow::anyhow;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use crate::AppState;
use crate::db::record_repo::{self, NewRecord};
use crate::db::{Db, zone_repo};
use crate::engine::{
    Divergence, SideEffect, WriteOutcome, bump_serial_or_warn, canonical_content, echo,
    store_serial,
};
use crate::error::{AppError, AppResult};
use crate::models::{Record, RecordProviderData, RecordType, Zone, ZoneKind};
use crate::provider::RecordSpec;
use crate::reverse::ptr_location;
use crate::validation::{
    normalize_fqdn, normalize_record_name, validate_record_content, validate_ttl,
};

#[derive(Debug, Clone, Deserialize)]
pub struct RecordRequest {
    /// Relative, absolute, or `@` for the apex.
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: RecordType,
    pub content: String,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub comment: Option<String>,
    /// Also create the PTR for an A/AAAA record.
    #[serde(default)]
    pub auto_ptr: bool,
    #[serde(default)]
    pub allow_duplicate: bool,
}

impl RecordRequest {
    pub fn new(name: impl Into<String>, rtype: RecordType, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rtype,
            content: content.into(),
            ttl: None,
            priority: None,
            disabled: false,
            comment: None,
            auto_ptr: false,
            allow_duplicate: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordPatch {
    pub content: Option<String>,
    pub ttl: Option<u32>,
    pub priority: Option<u16>,
    pub disabled: Option<bool>,
    pub comment: Option<String>,
    /// Move the PTR along with an A/AAAA content change.
    #[serde(default)]
    pub update_ptr: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DeleteRecordOptions {
    #[serde(default)]
    pub delete_ptr: bool,
    /// Only drop the cached row.
    #[serde(default)]
    pub skip_remote: bool,
}

pub async fn list_records(state: &AppState, zone_id: i64) -> AppResult<Vec<Record>> {
    state.zone(zone_id).await?;
    Ok(record_repo::list(&state.db, zone_id).await?)
}

pub async fn get_record(state: &AppState, record_id: i64) -> AppResult<Record> {
    record_repo::find(&state.db, record_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("record {record_id}")))
}

/// Validate and canonicalise a request against its zone.
fn prepare_record(zone: &Zone, req: &RecordRequest) -> AppResult<RecordSpec> {
    if zone.kind == ZoneKind::Secondary {
        return Err(AppError::validation(format!(
            "{} is a secondary zone; its records come from the masters",
            zone.name
        )));
    }
    let name = normalize_record_name(&req.name, &zone.name)?;
    validate_record_content(&req.rtype, &req.content, req.priority)?;
    let ttl = req.ttl.unwrap_or(zone.ttl);
    validate_ttl(ttl)?;

    Ok(RecordSpec {
        name,
        rtype: req.rtype.clone(),
        content: canonical_content(&req.rtype, &req.content),
        ttl,
        priority: req.priority.filter(|_| req.rtype.has_priority()),
        disabled: req.disabled,
        comment: req.comment.clone(),
    })
}

pub async fn create_record(
    state: &AppState,
    zone_id: i64,
    req: RecordRequest,
) -> AppResult<WriteOutcome<Record>> {
    let zone = state.zone(zone_id).await?;
    let spec = prepare_record(&zone, &req)?;
    let mut outcome = create_in_zone(state, &zone, &spec, req.allow_duplicate).await?;

    if req.auto_ptr {
        if spec.rtype.is_address() {
            add_ptr(state, &spec.content, &spec.name, spec.ttl, &mut outcome).await;
        } else {
            outcome.warn(format!("auto_ptr ignored for {} records", spec.rtype));
        }
    }
    Ok(outcome)
}

/// One pass of the write-through sequence for a single new record. No PTR handling.
async fn create_in_zone(
    state: &AppState,
    zone: &Zone,
    spec: &RecordSpec,
    allow_duplicate: bool,
) -> AppResult<WriteOutcome<Record>> {
    let client = state.client_for_zone(zone).await?;
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;

    if !allow_duplicate {
        let existing = record_repo::find_matching(
            &state.db,
            zone.id,
            &spec.name,
            &spec.rtype,
            &spec.content,
        )
        .await?;
        if let Some(existing) = existing {
            return Err(AppError::AlreadyExists(format!(
                "{} {} {} (record {})",
                spec.name, spec.rtype, spec.content, existing.id
            )));
        }
    }

    debug!(zone = %zone.name, name = %spec.name, rtype = %spec.rtype, "creating record remotely");
    let remote = client.create_record(zone.remote_id(), spec).await?;
    let mut outcome = WriteOutcome::new(echo(&remote));
    let serial = bump_serial_or_warn(client.as_ref(), zone, &mut outcome).await;

    let row = NewRecord {
        zone_id: zone.id,
        name: spec.name.clone(),
        rtype: spec.rtype.clone(),
        content: spec.content.clone(),
        ttl: spec.ttl,
        priority: spec.priority,
        disabled: spec.disabled,
        comment: spec.comment.clone(),
        external_id: Some(remote.id.clone()),
        provider_data: RecordProviderData::from_raw(&remote.raw),
    };
    match commit_insert(&state.db, zone, &row, serial).await {
        Ok(record) => {
            info!(zone = %zone.name, record_id = record.id, name = %record.name, rtype = %record.rtype, "record created");
            outcome.local = Some(record);
        }
        Err(e) => {
            outcome.divergence = Some(Divergence::record(
                "create_record",
                format!("{} {} {}", spec.name, spec.rtype, spec.content),
                Some(remote.id.clone()),
                e,
            ));
        }
    }
    Ok(outcome)
}

async fn commit_insert(
    db: &Db,
    zone: &Zone,
    row: &NewRecord,
    serial: Option<u32>,
) -> AppResult<Record> {
    let mut tx = db.begin().await?;
    let id = record_repo::insert(&mut *tx, row).await?;
    if let Some(serial) = serial {
        store_serial(&mut *tx, zone, serial).await?;
    }
    let record = record_repo::find(&mut *tx, id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow!("record {id} missing after insert")))?;
    tx.commit().await?;
    Ok(record)
}

pub async fn update_record(
    state: &AppState,
    record_id: i64,
    patch: RecordPatch,
) -> AppResult<WriteOutcome<Record>> {
    let record = get_record(state, record_id).await?;
    let zone = state.zone(record.zone_id).await?;

    let req = RecordRequest {
        name: record.name.clone(),
        rtype: record.rtype.clone(),
        content: patch.content.clone().unwrap_or_else(|| record.content.clone()),
        ttl: Some(patch.ttl.unwrap_or(record.ttl)),
        priority: patch.priority.or(record.priority),
        disabled: patch.disabled.unwrap_or(record.disabled),
        comment: patch.comment.clone().or_else(|| record.comment.clone()),
        auto_ptr: false,
        allow_duplicate: false,
    };
    let spec = prepare_record(&zone, &req)?;
    let content_changed = spec.content != record.content;
    let external_id = record.external_id.clone().ok_or_else(|| {
        AppError::conflict(format!(
            "record {} has no remote identifier; sync the zone first",
            record.id
        ))
    })?;
    let client = state.client_for_zone(&zone).await?;

    let guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    if content_changed {
        let clash =
            record_repo::find_matching(&state.db, zone.id, &spec.name, &spec.rtype, &spec.content)
                .await?;
        if let Some(other) = clash.filter(|o| o.id != record.id) {
            return Err(AppError::AlreadyExists(format!(
                "{} {} {} (record {})",
                spec.name, spec.rtype, spec.content, other.id
            )));
        }
    }

    let remote = client
        .update_record(zone.remote_id(), &external_id, &spec)
        .await?;
    let mut outcome = WriteOutcome::new(echo(&remote));
    let serial = bump_serial_or_warn(client.as_ref(), &zone, &mut outcome).await;

    let mut updated = record.clone();
    updated.content = spec.content.clone();
    updated.ttl = spec.ttl;
    updated.priority = spec.priority;
    updated.disabled = spec.disabled;
    updated.comment = spec.comment.clone();
    updated.external_id = Some(remote.id.clone());
    updated.provider_data = RecordProviderData::from_raw(&remote.raw);
    updated.last_synced = Some(Utc::now());

    match commit_update(&state.db, &zone, &updated, serial).await {
        Ok(record) => {
            info!(zone = %zone.name, record_id = record.id, "record updated");
            outcome.local = Some(record);
        }
        Err(e) => {
            outcome.divergence = Some(Divergence::record(
                "update_record",
                format!("record {}", record.id),
                Some(remote.id.clone()),
                e,
            ));
        }
    }
    drop(guard);

    // Delete first, then create: the old PTR is briefly absent.
    if patch.update_ptr && content_changed && record.rtype.is_address() {
        remove_ptr(state, &record.content, &record.name, false, &mut outcome).await;
        add_ptr(state, &spec.content, &spec.name, spec.ttl, &mut outcome).await;
    }
    Ok(outcome)
}

async fn commit_update(
    db: &Db,
    zone: &Zone,
    record: &Record,
    serial: Option<u32>,
) -> AppResult<Record> {
    let mut tx = db.begin().await?;
    record_repo::update(&mut *tx, record).await?;
    if let Some(serial) = serial {
        store_serial(&mut *tx, zone, serial).await?;
    }
    let stored = record_repo::find(&mut *tx, record.id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("record {}", record.id)))?;
    tx.commit().await?;
    Ok(stored)
}

pub async fn delete_record(
    state: &AppState,
    record_id: i64,
    opts: DeleteRecordOptions,
) -> AppResult<WriteOutcome<Record>> {
    let record = get_record(state, record_id).await?;
    let zone = state.zone(record.zone_id).await?;
    let mut outcome = delete_in_zone(state, &zone, &record, opts.skip_remote).await?;

    if opts.delete_ptr && record.rtype.is_address() {
        remove_ptr(
            state,
            &record.content,
            &record.name,
            opts.skip_remote,
            &mut outcome,
        )
        .await;
    }
    Ok(outcome)
}

async fn delete_in_zone(
    state: &AppState,
    zone: &Zone,
    record: &Record,
    skip_remote: bool,
) -> AppResult<WriteOutcome<Record>> {
    let client = if skip_remote {
        None
    } else {
        Some(state.client_for_zone(zone).await?)
    };
    let _guard = state.zone_locks.lock(zone.provider_id, &zone.name).await;
    let mut outcome = WriteOutcome::new(None);
    let mut serial = None;

    if let Some(client) = client {
        match &record.external_id {
            Some(remote_id) => match client.delete_record(zone.remote_id(), remote_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    outcome.warn(format!("{} {} was already absent remotely", record.name, record.rtype));
                }
                Err(e) => return Err(e.into()),
            },
            None => outcome.warn(format!(
                "record {} has no remote identifier; removed from the cache only",
                record.id
            )),
        }
        serial = bump_serial_or_warn(client.as_ref(), zone, &mut outcome).await;
    }

    let committed = async {
        let mut tx = state.db.begin().await?;
        record_repo::soft_delete(&mut *tx, record.id).await?;
        if let Some(serial) = serial {
            store_serial(&mut *tx, zone, serial).await?;
        }
        tx.commit().await
    }
    .await;

    match committed {
        Ok(()) => info!(zone = %zone.name, record_id = record.id, skip_remote, "record deleted"),
        Err(e) if skip_remote => return Err(e.into()),
        Err(e) => {
            outcome.divergence = Some(Divergence::record(
                "delete_record",
                format!("record {}", record.id),
                record.external_id.clone(),
                e,
            ));
        }
    }
    Ok(outcome)
}

/// Create the PTR for `address` pointing at `target` in whichever managed zone covers it.
/// Failures become side-effect entries on `outcome`; the primary write already happened.
async fn add_ptr(
    state: &AppState,
    address: &str,
    target: &str,
    ttl: u32,
    outcome: &mut WriteOutcome<Record>,
) {
    let Ok(ip) = address.parse::<IpAddr>() else {
        return;
    };
    let loc = ptr_location(ip, &state.config.reverse);
    let ptr_zone = match zone_repo::find_by_name_any(&state.db, &loc.zone).await {
        Ok(Some(zone)) => zone,
        Ok(None) => {
            outcome.side_effects.push(SideEffect::PtrSkipped {
                name: loc.fqdn(),
                reason: format!("reverse zone {} is not managed here", loc.zone),
            });
            return;
        }
        Err(e) => {
            outcome.warn(format!("looking up reverse zone {}: {e}", loc.zone));
            return;
        }
    };

    let mut req = RecordRequest::new(loc.name.clone(), RecordType::PTR, target);
    req.ttl = Some(ttl);
    let created = match prepare_record(&ptr_zone, &req) {
        Ok(spec) => create_in_zone(state, &ptr_zone, &spec, false).await,
        Err(e) => Err(e),
    };

    match created {
        Ok(ptr) => {
            outcome.side_effects.push(SideEffect::PtrCreated {
                zone: ptr_zone.name.clone(),
                name: loc.fqdn(),
                record_id: ptr.local.as_ref().map(|r| r.id),
            });
            outcome.side_effects.extend(ptr.side_effects);
            if outcome.divergence.is_none() {
                outcome.divergence = ptr.divergence;
            }
        }
        Err(AppError::AlreadyExists(_)) => {
            outcome.side_effects.push(SideEffect::PtrSkipped {
                name: loc.fqdn(),
                reason: "PTR already exists".into(),
            });
        }
        Err(e) => outcome.warn(format!("PTR {} not created: {e}", loc.fqdn())),
    }
}

/// Delete cached PTRs for `address` that point at `target`.
async fn remove_ptr(
    state: &AppState,
    address: &str,
    target: &str,
    skip_remote: bool,
    outcome: &mut WriteOutcome<Record>,
) {
    let Ok(ip) = address.parse::<IpAddr>() else {
        return;
    };
    let loc = ptr_location(ip, &state.config.reverse);
    let ptr_zone = match zone_repo::find_by_name_any(&state.db, &loc.zone).await {
        Ok(Some(zone)) => zone,
        Ok(None) => {
            outcome.side_effects.push(SideEffect::PtrSkipped {
                name: loc.fqdn(),
                reason: format!("reverse zone {} is not managed here", loc.zone),
            });
            return;
        }
        Err(e) => {
            outcome.warn(format!("looking up reverse zone {}: {e}", loc.zone));
            return;
        }
    };

    let target = normalize_fqdn(target);
    let ptrs = match record_repo::find_by_name_type(
        &state.db,
        ptr_zone.id,
        &loc.fqdn(),
        &RecordType::PTR,
    )
    .await
    {
        Ok(found) => found,
        Err(e) => {
            outcome.warn(format!("looking up PTR {}: {e}", loc.fqdn()));
            return;
        }
    };
    let matching: Vec<Record> = ptrs.into_iter().filter(|r| r.content == target).collect();
    if matching.is_empty() {
        outcome.side_effects.push(SideEffect::PtrSkipped {
            name: loc.fqdn(),
            reason: format!("no PTR pointing at {target}"),
        });
        return;
    }

    for ptr in matching {
        match delete_in_zone(state, &ptr_zone, &ptr, skip_remote).await {
            Ok(deleted) => {
                outcome.side_effects.push(SideEffect::PtrDeleted {
                    zone: ptr_zone.name.clone(),
                    name: ptr.name.clone(),
                });
                outcome.side_effects.extend(deleted.side_effects);
                if outcome.divergence.is_none() {
                    outcome.divergence = deleted.divergence;
                }
            }
            Err(e) => outcome.warn(format!("PTR {} not deleted: {e}", ptr.name)),
        }
    }
}
