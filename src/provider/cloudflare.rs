//! CloudFlare v4 backend. Serials and DNSSEC keys are managed by CloudFlare itself.
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::cloudflare::client::{CloudflareClient, DEFAULT_BASE_URL};
use crate::cloudflare::types::*;
use crate::error::{AppError, AppResult};
use crate::models::{DnssecKey, KeyType, Provider, ProviderType, RecordType};
use crate::provider::{
    Capabilities, DnsProvider, DnssecMode, DnssecStatus, ProviderDeps, ProviderError,
    ProviderResult, RecordSpec, RemoteRecord, RemoteZone, ZoneSpec, ZoneUpdate,
};
use crate::validation::normalize_fqdn;

pub struct CloudflareProvider {
    client: CloudflareClient,
    account_id: Option<String>,
}

impl CloudflareProvider {
    pub fn from_provider(provider: &Provider, deps: &ProviderDeps) -> AppResult<Self> {
        let conn = &provider.connection;
        let token = conn.api_token.clone().ok_or_else(|| {
            AppError::configuration(format!("provider '{}': missing api_token", provider.name))
        })?;
        let base_url = conn.endpoint.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            client: CloudflareClient::new(deps.http.clone(), base_url, token)
                .policy(provider.policy),
            account_id: conn.account_id.clone(),
        })
    }
}

fn remote_zone(zone: &CfZone) -> RemoteZone {
    RemoteZone {
        id: zone.id.clone(),
        name: normalize_fqdn(&zone.name),
        kind: None,
        serial: None,
        masters: Vec::new(),
        nameservers: zone.name_servers.iter().map(|ns| normalize_fqdn(ns)).collect(),
        dnssec: false,
        raw: serde_json::to_value(zone).unwrap_or(Value::Null),
    }
}

fn remote_record(rec: &CfDnsRecord) -> Option<RemoteRecord> {
    let rtype = rec.record_type.parse::<RecordType>().ok()?;
    let content = match (&rtype, &rec.data) {
        (RecordType::SRV, Some(data)) if rec.content.is_empty() => srv_content(data)?,
        (RecordType::CAA, Some(data)) if rec.content.is_empty() => caa_content(data)?,
        _ => rec.content.clone(),
    };
    let content = match rtype {
        RecordType::CNAME | RecordType::NS | RecordType::PTR | RecordType::MX => {
            normalize_fqdn(&content)
        }
        _ => content,
    };
    let priority = match (&rtype, rec.priority) {
        (RecordType::SRV, None) => rec
            .data
            .as_ref()
            .and_then(|d| d.get("priority"))
            .and_then(Value::as_u64)
            .map(|p| p as u16),
        (_, p) => p,
    };

    Some(RemoteRecord {
        id: rec.id.clone(),
        name: normalize_fqdn(&rec.name),
        rtype,
        content,
        ttl: rec.ttl,
        priority,
        disabled: false,
        comment: rec.comment.clone(),
        raw: json!({ "proxied": rec.proxied }),
    })
}

fn srv_content(data: &Value) -> Option<String> {
    Some(format!(
        "{} {} {}",
        data.get("weight")?.as_u64()?,
        data.get("port")?.as_u64()?,
        normalize_fqdn(data.get("target")?.as_str()?)
    ))
}

fn caa_content(data: &Value) -> Option<String> {
    Some(format!(
        "{} {} \"{}\"",
        data.get("flags")?.as_u64()?,
        data.get("tag")?.as_str()?,
        data.get("value")?.as_str()?
    ))
}

/// SRV and CAA go out as structured `data`; everything else as plain content.
fn record_body(spec: &RecordSpec) -> ProviderResult<CfRecordBody> {
    let name = spec.name.trim_end_matches('.').to_string();
    let bad = |reason: &str| ProviderError::Rejected {
        status: 400,
        message: format!("{} {}: {reason}", spec.name, spec.rtype),
    };

    let (content, data) = match spec.rtype {
        RecordType::SRV => {
            let parts: Vec<&str> = spec.content.split_whitespace().collect();
            let [weight, port, target] = parts.as_slice() else {
                return Err(bad("expected 'weight port target'"));
            };
            let weight: u16 = weight.parse().map_err(|_| bad("weight"))?;
            let port: u16 = port.parse().map_err(|_| bad("port"))?;
            let data = json!({
                "priority": spec.priority.unwrap_or(0),
                "weight": weight,
                "port": port,
                "target": target.trim_end_matches('.'),
            });
            (None, Some(data))
        }
        RecordType::CAA => {
            let mut parts = spec.content.splitn(3, char::is_whitespace);
            let (Some(flags), Some(tag), Some(value)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(bad("expected 'flags tag value'"));
            };
            let flags: u8 = flags.parse().map_err(|_| bad("flags"))?;
            let data = json!({
                "flags": flags,
                "tag": tag,
                "value": value.trim().trim_matches('"'),
            });
            (None, Some(data))
        }
        RecordType::CNAME | RecordType::NS | RecordType::PTR | RecordType::MX => {
            (Some(spec.content.trim_end_matches('.').to_string()), None)
        }
        _ => (Some(spec.content.clone()), None),
    };

    Ok(CfRecordBody {
        record_type: spec.rtype.to_string(),
        name,
        content,
        ttl: spec.ttl,
        priority: if spec.rtype == RecordType::MX {
            spec.priority
        } else {
            None
        },
        comment: spec.comment.clone(),
        data,
    })
}

fn dnssec_status(d: &CfDnssec) -> DnssecStatus {
    let enabled = d.status == "active" || d.status == "pending";
    let keys = if enabled {
        vec![DnssecKey {
            id: d.key_tag.map(|t| t.to_string()).unwrap_or_else(|| "managed".into()),
            key_type: KeyType::Csk,
            algorithm: d.algorithm.clone().unwrap_or_default(),
            bits: None,
            active: d.status == "active",
            published: true,
            created_at: d
                .modified_on
                .as_deref()
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&chrono::Utc)),
            ds: d.ds.iter().cloned().collect(),
        }]
    } else {
        Vec::new()
    };
    DnssecStatus { enabled, keys }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Cloudflare
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            dnssec: DnssecMode::ProviderManaged,
            manages_serial: true,
        }
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        self.client.verify_token().await
    }

    async fn list_zones(&self) -> ProviderResult<Vec<RemoteZone>> {
        Ok(self.client.list_zones().await?.iter().map(remote_zone).collect())
    }

    async fn get_zone(&self, zone_id: &str) -> ProviderResult<RemoteZone> {
        Ok(remote_zone(&self.client.get_zone(zone_id).await?))
    }

    async fn create_zone(&self, spec: &ZoneSpec) -> ProviderResult<RemoteZone> {
        let account = self
            .account_id
            .clone()
            .ok_or(ProviderError::Unsupported("zone creation without account_id"))?;
        let body = CfZoneCreate {
            name: spec.name.trim_end_matches('.').to_string(),
            account: CfAccountRef { id: account },
            zone_type: "full".into(),
        };
        Ok(remote_zone(&self.client.create_zone(&body).await?))
    }

    async fn update_zone(&self, zone_id: &str, update: &ZoneUpdate) -> ProviderResult<RemoteZone> {
        if update.kind.is_some() || update.masters.is_some() {
            return Err(ProviderError::Unsupported("zone kind or masters on CloudFlare"));
        }
        // Zone TTL has no CloudFlare counterpart; it only lives in the local cache.
        self.get_zone(zone_id).await
    }

    async fn delete_zone(&self, zone_id: &str) -> ProviderResult<()> {
        self.client.delete_zone(zone_id).await
    }

    async fn list_records(&self, zone_id: &str) -> ProviderResult<Vec<RemoteRecord>> {
        Ok(self
            .client
            .list_records(zone_id)
            .await?
            .iter()
            .filter_map(remote_record)
            .collect())
    }

    async fn create_record(
        &self,
        zone_id: &str,
        record: &RecordSpec,
    ) -> ProviderResult<RemoteRecord> {
        let body = record_body(record)?;
        let created = self.client.create_record(zone_id, &body).await?;
        remote_record(&created)
            .ok_or_else(|| ProviderError::Decode(format!("record type {}", created.record_type)))
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &RecordSpec,
    ) -> ProviderResult<RemoteRecord> {
        let body = record_body(record)?;
        let updated = self.client.update_record(zone_id, record_id, &body).await?;
        remote_record(&updated)
            .ok_or_else(|| ProviderError::Decode(format!("record type {}", updated.record_type)))
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> ProviderResult<()> {
        self.client.delete_record(zone_id, record_id).await
    }

    async fn set_serial(&self, _zone_id: &str, _serial: u32) -> ProviderResult<()> {
        Ok(())
    }

    async fn enable_dnssec(&self, zone_id: &str) -> ProviderResult<DnssecStatus> {
        Ok(dnssec_status(&self.client.set_dnssec(zone_id, "active").await?))
    }

    async fn disable_dnssec(&self, zone_id: &str) -> ProviderResult<()> {
        self.client.set_dnssec(zone_id, "disabled").await?;
        Ok(())
    }

    async fn list_keys(&self, zone_id: &str) -> ProviderResult<Vec<DnssecKey>> {
        Ok(dnssec_status(&self.client.get_dnssec(zone_id).await?).keys)
    }
}
