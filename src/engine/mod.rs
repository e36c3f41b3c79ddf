//! Write-through mutations: validate, write the backend, then commit the local cache.
//!
//! A backend failure aborts before anything local changes. A local failure after a
//! successful backend write does not fail the call; it comes back as a [`Divergence`]
//! inside the [`WriteOutcome`] and is healed by the next sync.
pub mod providers;
pub mod records;
pub mod zones;

use std::net::IpAddr;

use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{error, info, warn};

use crate::db::record_repo::{self, NewRecord};
use crate::db::zone_repo;
use crate::error::AppResult;
use crate::models::{RecordProviderData, RecordType, Zone, ZoneProviderData};
use crate::provider::{DnsProvider, RemoteRecord, RemoteZone};
use crate::serial::{next_serial, today, with_soa_serial};
use crate::validation::{is_within_zone, normalize_fqdn};

/// Backend has the change, local cache does not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Divergence {
    pub operation: &'static str,
    pub entity: String,
    pub remote_id: Option<String>,
    pub message: String,
}

impl Divergence {
    pub(crate) fn record(
        operation: &'static str,
        entity: impl Into<String>,
        remote_id: Option<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        let d = Divergence {
            operation,
            entity: entity.into(),
            remote_id,
            message: err.to_string(),
        };
        error!(
            operation = d.operation,
            entity = %d.entity,
            remote_id = ?d.remote_id,
            error = %d.message,
            "local commit failed after remote write; cache diverged until next sync"
        );
        d
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    SerialBumped { zone: String, serial: u32 },
    PtrCreated { zone: String, name: String, record_id: Option<i64> },
    PtrDeleted { zone: String, name: String },
    PtrSkipped { name: String, reason: String },
    DnssecEnabled { zone: String },
    DnssecDisabled { zone: String },
    Warning { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome<T> {
    /// What the backend answered, when it answered anything.
    pub remote: Option<Value>,
    /// Committed local row. `None` after a delete or a divergence.
    pub local: Option<T>,
    pub divergence: Option<Divergence>,
    pub side_effects: Vec<SideEffect>,
}

impl<T> WriteOutcome<T> {
    pub(crate) fn new(remote: Option<Value>) -> Self {
        Self {
            remote,
            local: None,
            divergence: None,
            side_effects: Vec::new(),
        }
    }

    pub fn is_divergent(&self) -> bool {
        self.divergence.is_some()
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "write side effect");
        self.side_effects.push(SideEffect::Warning { message });
    }
}

pub(crate) fn echo<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Fetch the live serial, compute the next one, write it back. `None` when the backend
/// owns its serials. Callers hold the zone lock.
pub(crate) async fn bump_serial(
    client: &dyn DnsProvider,
    zone: &Zone,
) -> AppResult<Option<u32>> {
    if client.capabilities().manages_serial {
        return Ok(None);
    }
    let live = client.get_zone(zone.remote_id()).await?;
    let current = live.serial.unwrap_or(zone.serial);
    let next = next_serial(current, today());
    if next == current {
        warn!(zone = %zone.name, serial = current, "serial is at its ceiling and cannot advance");
    }
    client.set_serial(zone.remote_id(), next).await?;
    info!(zone = %zone.name, from = current, to = next, "serial bumped");
    Ok(Some(next))
}

/// Bump the serial after a content change. A failure here is reported, not fatal,
/// since the content change itself already landed.
pub(crate) async fn bump_serial_or_warn<T>(
    client: &dyn DnsProvider,
    zone: &Zone,
    outcome: &mut WriteOutcome<T>,
) -> Option<u32> {
    match bump_serial(client, zone).await {
        Ok(Some(serial)) => {
            outcome.side_effects.push(SideEffect::SerialBumped {
                zone: zone.name.clone(),
                serial,
            });
            Some(serial)
        }
        Ok(None) => None,
        Err(e) => {
            outcome.warn(format!("serial bump for {} failed: {e}", zone.name));
            None
        }
    }
}

/// Persist a bumped serial on the zone row and in the cached SOA record.
pub(crate) async fn store_serial(
    conn: &mut SqliteConnection,
    zone: &Zone,
    serial: u32,
) -> sqlx::Result<()> {
    zone_repo::set_serial(&mut *conn, zone.id, serial).await?;
    let soas = record_repo::find_by_name_type(&mut *conn, zone.id, &zone.name, &RecordType::SOA).await?;
    for mut soa in soas {
        if let Some(content) = with_soa_serial(&soa.content, serial) {
            soa.content = content;
            record_repo::update(&mut *conn, &soa).await?;
        }
    }
    Ok(())
}

/// Canonical stored form of record content: hostname targets are lowercased FQDNs and
/// addresses use their shortest textual form.
pub fn canonical_content(rtype: &RecordType, content: &str) -> String {
    let content = content.trim();
    match rtype {
        RecordType::A | RecordType::AAAA => content
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| content.to_string()),
        RecordType::CNAME | RecordType::NS | RecordType::PTR => normalize_fqdn(content),
        RecordType::MX if content == "." => content.to_string(),
        RecordType::MX => normalize_fqdn(content),
        RecordType::SRV => {
            let mut parts: Vec<String> = content.split_whitespace().map(str::to_string).collect();
            if let Some(target) = parts.last_mut() {
                if target.as_str() != "." {
                    *target = normalize_fqdn(target);
                }
            }
            parts.join(" ")
        }
        _ => content.to_string(),
    }
}

pub(crate) fn zone_provider_data(
    remote: &RemoteZone,
    previous: Option<&ZoneProviderData>,
) -> ZoneProviderData {
    let mut data = ZoneProviderData::default();
    if let Some(obj) = remote.raw.as_object() {
        data.extra = obj.clone();
    }
    data.remote_kind = remote.kind.map(|k| k.to_string());
    data.nameservers = remote.nameservers.clone();
    data.remote_serial = remote.serial;
    if let Some(prev) = previous {
        data.dnssec_managed = prev.dnssec_managed;
        data.dnssec_keys = prev.dnssec_keys.clone();
    }
    data
}

pub(crate) fn new_record(zone_id: i64, remote: &RemoteRecord) -> NewRecord {
    NewRecord {
        zone_id,
        name: normalize_fqdn(&remote.name),
        rtype: remote.rtype.clone(),
        content: canonical_content(&remote.rtype, &remote.content),
        ttl: remote.ttl,
        priority: remote.priority,
        disabled: remote.disabled,
        comment: remote.comment.clone(),
        external_id: Some(remote.id.clone()),
        provider_data: RecordProviderData::from_raw(&remote.raw),
    }
}

/// Remote records that belong to `zone`; out-of-zone glue is skipped.
pub(crate) fn in_zone<'a>(
    zone: &'a str,
    records: &'a [RemoteRecord],
) -> impl Iterator<Item = &'a RemoteRecord> + 'a {
    records.iter().filter(move |r| is_within_zone(&r.name, zone))
}
