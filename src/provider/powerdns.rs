//! PowerDNS authoritative backend, optionally reached through an SSH tunnel.
//!
//! PowerDNS has no per-record ids, so a record is identified by
//! `<name>|<type>|<wire content>` inside its RRset.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{DnssecKey, KeyType, Provider, ProviderType, RecordType, ZoneKind};
use crate::powerdns::client::PowerDnsClient;
use crate::powerdns::types::*;
use crate::provider::{
    Capabilities, DnsProvider, DnssecMode, DnssecStatus, KeyRequest, ProviderDeps,
    ProviderError, ProviderResult, RecordSpec, RemoteRecord, RemoteZone, ZoneSpec, ZoneUpdate,
    content_with_priority, split_priority,
};
use crate::serial::{soa_serial, with_soa_serial};
use crate::tunnel::{TunnelKey, TunnelManager};

const DEFAULT_API_PORT: u16 = 8081;
const DEFAULT_API_PATH: &str = "/api/v1";
const COMMENT_ACCOUNT: &str = "zonewarden";

enum Endpoint {
    Direct(String),
    Tunneled { key: TunnelKey, api_path: String },
}

pub struct PowerDnsProvider {
    http: reqwest::Client,
    api_key: String,
    server_id: String,
    endpoint: Endpoint,
    tunnels: Arc<TunnelManager>,
    timeout: Duration,
}

impl PowerDnsProvider {
    pub fn from_provider(provider: &Provider, deps: &ProviderDeps) -> AppResult<Self> {
        let conn = &provider.connection;
        let api_key = conn.api_key.clone().ok_or_else(|| {
            AppError::configuration(format!("provider '{}': missing api_key", provider.name))
        })?;

        let endpoint = match &conn.ssh_host {
            Some(host) => Endpoint::Tunneled {
                key: TunnelKey {
                    host: host.clone(),
                    user: conn.ssh_user.clone(),
                    ssh_port: conn.ssh_port,
                    remote_port: conn.remote_api_port.unwrap_or(DEFAULT_API_PORT),
                },
                api_path: conn
                    .endpoint
                    .as_deref()
                    .and_then(api_path_of)
                    .unwrap_or_else(|| DEFAULT_API_PATH.to_string()),
            },
            None => Endpoint::Direct(conn.endpoint.clone().ok_or_else(|| {
                AppError::configuration(format!(
                    "provider '{}': needs either endpoint or ssh_host",
                    provider.name
                ))
            })?),
        };

        Ok(Self {
            http: deps.http.clone(),
            api_key,
            server_id: conn.server_id.clone().unwrap_or_else(|| "localhost".into()),
            endpoint,
            tunnels: deps.tunnels.clone(),
            timeout: Duration::from_secs(provider.policy.timeout_secs),
        })
    }

    /// Client bound to a live endpoint; tunnel failures surface as `ProviderError::Tunnel`.
    async fn client(&self) -> ProviderResult<PowerDnsClient> {
        let base_url = match &self.endpoint {
            Endpoint::Direct(url) => url.clone(),
            Endpoint::Tunneled { key, api_path } => {
                let port = self.tunnels.ensure(key).await?;
                format!("http://127.0.0.1:{port}{api_path}")
            }
        };
        Ok(PowerDnsClient::with_http(
            self.http.clone(),
            base_url,
            &self.api_key,
            &self.server_id,
        )
        .timeout(self.timeout))
    }

    async fn rrset(
        &self,
        client: &PowerDnsClient,
        zone_id: &str,
        name: &str,
        rtype: &str,
    ) -> ProviderResult<Option<PdnsRrset>> {
        let zone = client.get_zone(zone_id).await?;
        Ok(zone
            .rrsets
            .unwrap_or_default()
            .into_iter()
            .find(|rr| rr.name.eq_ignore_ascii_case(name) && rr.rrtype == rtype))
    }
}

fn api_path_of(endpoint: &str) -> Option<String> {
    let rest = endpoint.split_once("://").map(|(_, r)| r).unwrap_or(endpoint);
    rest.find('/').map(|i| rest[i..].trim_end_matches('/').to_string())
}

pub fn record_id(name: &str, rtype: &str, wire_content: &str) -> String {
    format!("{name}|{rtype}|{wire_content}")
}

fn parse_record_id(id: &str) -> ProviderResult<(String, String, String)> {
    let mut parts = id.splitn(3, '|');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(rtype), Some(content)) => {
            Ok((name.to_string(), rtype.to_string(), content.to_string()))
        }
        _ => Err(ProviderError::NotFound(format!(
            "malformed PowerDNS record id '{id}'"
        ))),
    }
}

fn pdns_kind(kind: ZoneKind) -> ProviderResult<&'static str> {
    match kind {
        ZoneKind::Native => Ok("Native"),
        ZoneKind::Primary => Ok("Master"),
        ZoneKind::Secondary => Ok("Slave"),
        ZoneKind::Forwarded => Err(ProviderError::Unsupported(
            "forwarded zones on PowerDNS authoritative",
        )),
    }
}

fn remote_zone(zone: &PdnsZone) -> RemoteZone {
    let soa = zone
        .rrsets
        .iter()
        .flatten()
        .find(|rr| rr.rrtype == "SOA")
        .and_then(|rr| rr.records.first())
        .and_then(|r| soa_serial(&r.content));
    let nameservers = zone
        .rrsets
        .iter()
        .flatten()
        .filter(|rr| rr.rrtype == "NS" && rr.name.eq_ignore_ascii_case(&zone.name))
        .flat_map(|rr| rr.records.iter().map(|r| r.content.clone()))
        .collect();

    let mut raw = serde_json::to_value(zone).unwrap_or(Value::Null);
    if let Some(obj) = raw.as_object_mut() {
        obj.remove("rrsets");
    }

    RemoteZone {
        id: zone.id.clone(),
        name: zone.name.clone(),
        kind: zone.kind.parse().ok(),
        serial: zone.serial.or(soa),
        masters: zone.masters.clone(),
        nameservers,
        dnssec: zone.dnssec,
        raw,
    }
}

fn remote_records(rrsets: &[PdnsRrset]) -> Vec<RemoteRecord> {
    let mut out = Vec::new();
    for rr in rrsets {
        let Ok(rtype) = rr.rrtype.parse::<RecordType>() else {
            continue;
        };
        let comment = rr.comments.first().map(|c| c.content.clone());
        for rec in &rr.records {
            let (priority, content) = split_priority(&rtype, &rec.content);
            out.push(RemoteRecord {
                id: record_id(&rr.name, &rr.rrtype, &rec.content),
                name: rr.name.clone(),
                rtype: rtype.clone(),
                content,
                ttl: rr.ttl.unwrap_or(0),
                priority,
                disabled: rec.disabled,
                comment: comment.clone(),
                raw: serde_json::json!({
                    "content": rec.content,
                    "disabled": rec.disabled,
                }),
            });
        }
    }
    out
}

fn remote_record(spec: &RecordSpec) -> RemoteRecord {
    let wire = content_with_priority(&spec.rtype, &spec.content, spec.priority);
    RemoteRecord {
        id: record_id(&spec.name, spec.rtype.as_str(), &wire),
        name: spec.name.clone(),
        rtype: spec.rtype.clone(),
        content: spec.content.clone(),
        ttl: spec.ttl,
        priority: spec.priority,
        disabled: spec.disabled,
        comment: spec.comment.clone(),
        raw: serde_json::json!({ "content": wire, "disabled": spec.disabled }),
    }
}

fn comments_for(spec: &RecordSpec, existing: Vec<PdnsComment>) -> Vec<PdnsComment> {
    match &spec.comment {
        Some(text) => vec![PdnsComment {
            content: text.clone(),
            account: COMMENT_ACCOUNT.into(),
            modified_at: chrono::Utc::now().timestamp().max(0) as u64,
        }],
        None => existing,
    }
}

fn replace(
    name: &str,
    rtype: &str,
    ttl: Option<u32>,
    records: Vec<PdnsRecord>,
    comments: Vec<PdnsComment>,
) -> PdnsRrset {
    if records.is_empty() {
        return PdnsRrset {
            name: name.to_string(),
            rrtype: rtype.to_string(),
            ttl: None,
            changetype: Some("DELETE".into()),
            records: Vec::new(),
            comments: Vec::new(),
        };
    }
    PdnsRrset {
        name: name.to_string(),
        rrtype: rtype.to_string(),
        ttl,
        changetype: Some("REPLACE".into()),
        records,
        comments,
    }
}

fn remote_key(key: &PdnsCryptokey) -> DnssecKey {
    DnssecKey {
        id: key.id.to_string(),
        key_type: key.keytype.parse().unwrap_or(KeyType::Csk),
        algorithm: key.algorithm.clone().unwrap_or_default(),
        bits: key.bits,
        active: key.active,
        published: key.published,
        created_at: None,
        ds: key.ds.clone(),
    }
}

#[async_trait]
impl DnsProvider for PowerDnsProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::PowerDns
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            dnssec: DnssecMode::SelfManaged,
            manages_serial: false,
        }
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        let client = self.client().await?;
        client.server_info().await?;
        Ok(())
    }

    async fn list_zones(&self) -> ProviderResult<Vec<RemoteZone>> {
        let client = self.client().await?;
        Ok(client.list_zones().await?.iter().map(remote_zone).collect())
    }

    async fn get_zone(&self, zone_id: &str) -> ProviderResult<RemoteZone> {
        let client = self.client().await?;
        Ok(remote_zone(&client.get_zone(zone_id).await?))
    }

    async fn create_zone(&self, spec: &ZoneSpec) -> ProviderResult<RemoteZone> {
        let client = self.client().await?;
        let secondary = spec.kind == ZoneKind::Secondary;

        let mut rrsets = Vec::new();
        if !secondary {
            let mname = spec
                .nameservers
                .first()
                .cloned()
                .unwrap_or_else(|| format!("ns1.{}", spec.name));
            rrsets.push(PdnsRrset {
                name: spec.name.clone(),
                rrtype: "SOA".into(),
                ttl: Some(spec.ttl),
                changetype: None,
                records: vec![PdnsRecord {
                    content: format!(
                        "{mname} {} {} 10800 3600 604800 {}",
                        spec.soa_contact, spec.serial, spec.ttl
                    ),
                    disabled: false,
                }],
                comments: Vec::new(),
            });
            if !spec.nameservers.is_empty() {
                rrsets.push(PdnsRrset {
                    name: spec.name.clone(),
                    rrtype: "NS".into(),
                    ttl: Some(spec.ttl),
                    changetype: None,
                    records: spec
                        .nameservers
                        .iter()
                        .map(|ns| PdnsRecord {
                            content: ns.clone(),
                            disabled: false,
                        })
                        .collect(),
                    comments: Vec::new(),
                });
            }
        }

        let z = PdnsZoneCreate {
            name: spec.name.clone(),
            kind: pdns_kind(spec.kind)?.into(),
            masters: spec.masters.clone(),
            nameservers: Vec::new(),
            rrsets,
        };
        debug!(zone = %spec.name, kind = %z.kind, "creating PowerDNS zone");
        let created = client.create_zone(&z).await?;
        Ok(remote_zone(&created))
    }

    async fn update_zone(&self, zone_id: &str, update: &ZoneUpdate) -> ProviderResult<RemoteZone> {
        let client = self.client().await?;

        if update.kind.is_some() || update.masters.is_some() {
            let body = PdnsZoneUpdate {
                kind: update.kind.map(pdns_kind).transpose()?.map(str::to_string),
                masters: update.masters.clone(),
                api_rectify: None,
            };
            client.update_zone(zone_id, &body).await?;
        }

        if let Some(ttl) = update.ttl {
            let zone = client.get_zone(zone_id).await?;
            if let Some(mut soa) = zone
                .rrsets
                .unwrap_or_default()
                .into_iter()
                .find(|rr| rr.rrtype == "SOA")
            {
                soa.ttl = Some(ttl);
                soa.changetype = Some("REPLACE".into());
                client.patch_rrsets(zone_id, &[soa]).await?;
            }
        }

        Ok(remote_zone(&client.get_zone(zone_id).await?))
    }

    async fn delete_zone(&self, zone_id: &str) -> ProviderResult<()> {
        let client = self.client().await?;
        client.delete_zone(zone_id).await
    }

    async fn list_records(&self, zone_id: &str) -> ProviderResult<Vec<RemoteRecord>> {
        let client = self.client().await?;
        let zone = client.get_zone(zone_id).await?;
        Ok(remote_records(zone.rrsets.as_deref().unwrap_or_default()))
    }

    async fn create_record(
        &self,
        zone_id: &str,
        record: &RecordSpec,
    ) -> ProviderResult<RemoteRecord> {
        let client = self.client().await?;
        let rtype = record.rtype.as_str();
        let wire = content_with_priority(&record.rtype, &record.content, record.priority);

        let existing = self.rrset(&client, zone_id, &record.name, rtype).await?;
        let (mut records, comments) = match existing {
            Some(rr) => (rr.records, rr.comments),
            None => (Vec::new(), Vec::new()),
        };
        if records.iter().any(|r| r.content == wire) {
            return Err(ProviderError::Rejected {
                status: 409,
                message: format!("{} {} {} already present", record.name, rtype, wire),
            });
        }
        records.push(PdnsRecord {
            content: wire,
            disabled: record.disabled,
        });

        let rrset = replace(
            &record.name,
            rtype,
            Some(record.ttl),
            records,
            comments_for(record, comments),
        );
        client.patch_rrsets(zone_id, &[rrset]).await?;
        Ok(remote_record(record))
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &RecordSpec,
    ) -> ProviderResult<RemoteRecord> {
        let client = self.client().await?;
        let (name, rtype, old_wire) = parse_record_id(record_id)?;
        let wire = content_with_priority(&record.rtype, &record.content, record.priority);

        let rr = self
            .rrset(&client, zone_id, &name, &rtype)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("rrset {name} {rtype}")))?;
        let mut records = rr.records;
        let slot = records
            .iter_mut()
            .find(|r| r.content == old_wire)
            .ok_or_else(|| ProviderError::NotFound(format!("record {record_id}")))?;
        slot.content = wire;
        slot.disabled = record.disabled;

        let rrset = replace(
            &name,
            &rtype,
            Some(record.ttl),
            records,
            comments_for(record, rr.comments),
        );
        client.patch_rrsets(zone_id, &[rrset]).await?;
        Ok(remote_record(record))
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> ProviderResult<()> {
        let client = self.client().await?;
        let (name, rtype, wire) = parse_record_id(record_id)?;

        let rr = self
            .rrset(&client, zone_id, &name, &rtype)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("rrset {name} {rtype}")))?;
        let before = rr.records.len();
        let records: Vec<PdnsRecord> = rr
            .records
            .into_iter()
            .filter(|r| r.content != wire)
            .collect();
        if records.len() == before {
            return Err(ProviderError::NotFound(format!("record {record_id}")));
        }

        let rrset = replace(&name, &rtype, rr.ttl, records, rr.comments);
        client.patch_rrsets(zone_id, &[rrset]).await
    }

    async fn set_serial(&self, zone_id: &str, serial: u32) -> ProviderResult<()> {
        let client = self.client().await?;
        let zone = client.get_zone(zone_id).await?;
        let mut soa = zone
            .rrsets
            .unwrap_or_default()
            .into_iter()
            .find(|rr| rr.rrtype == "SOA")
            .ok_or_else(|| ProviderError::NotFound(format!("SOA of {zone_id}")))?;
        let record = soa
            .records
            .first_mut()
            .ok_or_else(|| ProviderError::NotFound(format!("SOA of {zone_id}")))?;
        record.content = with_soa_serial(&record.content, serial).ok_or_else(|| {
            ProviderError::Decode(format!("malformed SOA content '{}'", record.content))
        })?;
        soa.changetype = Some("REPLACE".into());
        client.patch_rrsets(zone_id, &[soa]).await
    }

    async fn enable_dnssec(&self, zone_id: &str) -> ProviderResult<DnssecStatus> {
        let client = self.client().await?;
        let body = PdnsZoneUpdate {
            api_rectify: Some(true),
            ..Default::default()
        };
        client.update_zone(zone_id, &body).await?;
        let keys: Vec<DnssecKey> = client
            .list_cryptokeys(zone_id)
            .await?
            .iter()
            .map(remote_key)
            .collect();
        Ok(DnssecStatus {
            enabled: keys.iter().any(|k| k.active),
            keys,
        })
    }

    async fn disable_dnssec(&self, zone_id: &str) -> ProviderResult<()> {
        let client = self.client().await?;
        for key in client.list_cryptokeys(zone_id).await? {
            client.delete_cryptokey(zone_id, &key.id.to_string()).await?;
        }
        Ok(())
    }

    async fn list_keys(&self, zone_id: &str) -> ProviderResult<Vec<DnssecKey>> {
        let client = self.client().await?;
        Ok(client
            .list_cryptokeys(zone_id)
            .await?
            .iter()
            .map(remote_key)
            .collect())
    }

    async fn generate_key(&self, zone_id: &str, req: &KeyRequest) -> ProviderResult<DnssecKey> {
        let client = self.client().await?;
        let body = PdnsCryptokeyCreate {
            keytype: req.key_type.to_string().to_ascii_lowercase(),
            active: req.active,
            algorithm: req.algorithm.clone(),
            bits: req.bits,
        };
        let created = client.create_cryptokey(zone_id, &body).await?;
        Ok(remote_key(&created))
    }

    async fn set_key_active(&self, zone_id: &str, key_id: &str, active: bool) -> ProviderResult<()> {
        let client = self.client().await?;
        client.set_cryptokey_active(zone_id, key_id, active).await
    }
}
