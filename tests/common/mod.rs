#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use zonewarden::config::AppConfig;
use zonewarden::db::{self, provider_repo};
use zonewarden::fcrdns::{DnsLookup, LookupError};
use zonewarden::models::{ConnectionConfig, DnssecKey, KeyType, ProviderType, RateLimitPolicy, RecordType};
use zonewarden::provider::{
    Capabilities, DnsProvider, DnssecMode, DnssecStatus, KeyRequest, ProviderError,
    ProviderRegistry, ProviderResult, RecordSpec, RemoteRecord, RemoteZone, ZoneSpec, ZoneUpdate,
    content_with_priority, split_priority,
};
use zonewarden::serial::{soa_serial, with_soa_serial};
use zonewarden::{AppState, SharedState};

#[derive(Debug, Clone)]
pub struct MockZone {
    pub spec_kind: zonewarden::models::ZoneKind,
    pub masters: Vec<String>,
    pub records: BTreeMap<String, RemoteRecord>,
    pub keys: Vec<DnssecKey>,
}

/// In-memory authoritative backend. Cloned handles share state.
#[derive(Default)]
pub struct MockBackend {
    pub zones: Mutex<HashMap<String, MockZone>>,
    next_id: AtomicU64,
    /// Every write call fails with a transient error while set.
    pub fail_writes: AtomicBool,
    /// Only DNSSEC enable/disable fail while set.
    pub fail_dnssec: AtomicBool,
    /// Listing calls take their snapshot, then wait this long before returning it.
    pub list_delay_ms: AtomicU64,
    pub calls: Mutex<Vec<String>>,
}

impl MockBackend {
    fn id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn note(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn check_write(&self) -> ProviderResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("backend unavailable".into()));
        }
        Ok(())
    }

    fn check_dnssec(&self) -> ProviderResult<()> {
        self.check_write()?;
        if self.fail_dnssec.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("signer unavailable".into()));
        }
        Ok(())
    }

    async fn list_pause(&self) {
        let ms = self.list_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn record(&self, spec: &RecordSpec) -> RemoteRecord {
        RemoteRecord {
            id: self.id(),
            name: spec.name.clone(),
            rtype: spec.rtype.clone(),
            content: spec.content.clone(),
            ttl: spec.ttl,
            priority: spec.priority,
            disabled: spec.disabled,
            comment: spec.comment.clone(),
            raw: json!({ "wire": content_with_priority(&spec.rtype, &spec.content, spec.priority) }),
        }
    }

    fn remote_zone(name: &str, zone: &MockZone) -> RemoteZone {
        let serial = zone
            .records
            .values()
            .find(|r| r.rtype == RecordType::SOA)
            .and_then(|r| soa_serial(&r.content));
        RemoteZone {
            id: name.to_string(),
            name: name.to_string(),
            kind: Some(zone.spec_kind),
            serial,
            masters: zone.masters.clone(),
            nameservers: zone
                .records
                .values()
                .filter(|r| r.rtype == RecordType::NS && r.name == name)
                .map(|r| r.content.clone())
                .collect(),
            dnssec: zone.keys.iter().any(|k| k.active),
            raw: json!({ "name": name }),
        }
    }

    /// Insert a record behind the engine's back, as another tool would.
    pub fn inject(&self, zone: &str, name: &str, rtype: RecordType, content: &str) -> String {
        let (priority, content) = split_priority(&rtype, content);
        let spec = RecordSpec {
            name: name.into(),
            rtype,
            content,
            ttl: 300,
            priority,
            disabled: false,
            comment: None,
        };
        let rec = self.record(&spec);
        let id = rec.id.clone();
        self.zones
            .lock()
            .unwrap()
            .get_mut(zone)
            .expect("zone exists")
            .records
            .insert(id.clone(), rec);
        id
    }

    pub fn remove(&self, zone: &str, record_id: &str) {
        self.zones
            .lock()
            .unwrap()
            .get_mut(zone)
            .expect("zone exists")
            .records
            .remove(record_id);
    }

    pub fn records(&self, zone: &str) -> Vec<RemoteRecord> {
        self.zones
            .lock()
            .unwrap()
            .get(zone)
            .map(|z| z.records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn serial(&self, zone: &str) -> Option<u32> {
        let zones = self.zones.lock().unwrap();
        let z = zones.get(zone)?;
        Self::remote_zone(zone, z).serial
    }
}

/// Newtype so the shared backend can be handed out as a `DnsProvider`.
pub struct MockProvider(pub Arc<MockBackend>);

#[async_trait]
impl DnsProvider for MockProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Custom
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            dnssec: DnssecMode::SelfManaged,
            manages_serial: false,
        }
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        Ok(())
    }

    async fn list_zones(&self) -> ProviderResult<Vec<RemoteZone>> {
        let snapshot: Vec<RemoteZone> = {
            let zones = self.0.zones.lock().unwrap();
            zones
                .iter()
                .map(|(name, z)| MockBackend::remote_zone(name, z))
                .collect()
        };
        self.0.list_pause().await;
        Ok(snapshot)
    }

    async fn get_zone(&self, zone_id: &str) -> ProviderResult<RemoteZone> {
        let zones = self.0.zones.lock().unwrap();
        zones
            .get(zone_id)
            .map(|z| MockBackend::remote_zone(zone_id, z))
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))
    }

    async fn create_zone(&self, spec: &ZoneSpec) -> ProviderResult<RemoteZone> {
        self.0.check_write()?;
        self.0.note(format!("create_zone {}", spec.name));
        let mut zone = MockZone {
            spec_kind: spec.kind,
            masters: spec.masters.clone(),
            records: BTreeMap::new(),
            keys: Vec::new(),
        };
        let mname = spec
            .nameservers
            .first()
            .cloned()
            .unwrap_or_else(|| format!("ns1.{}", spec.name));
        let mut specs = vec![RecordSpec {
            name: spec.name.clone(),
            rtype: RecordType::SOA,
            content: format!(
                "{mname} {} {} 10800 3600 604800 {}",
                spec.soa_contact, spec.serial, spec.ttl
            ),
            ttl: spec.ttl,
            priority: None,
            disabled: false,
            comment: None,
        }];
        for ns in &spec.nameservers {
            specs.push(RecordSpec {
                name: spec.name.clone(),
                rtype: RecordType::NS,
                content: ns.clone(),
                ttl: spec.ttl,
                priority: None,
                disabled: false,
                comment: None,
            });
        }
        for s in &specs {
            let rec = self.0.record(s);
            zone.records.insert(rec.id.clone(), rec);
        }
        let remote = MockBackend::remote_zone(&spec.name, &zone);
        self.0.zones.lock().unwrap().insert(spec.name.clone(), zone);
        Ok(remote)
    }

    async fn update_zone(&self, zone_id: &str, update: &ZoneUpdate) -> ProviderResult<RemoteZone> {
        self.0.check_write()?;
        let mut zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        if let Some(kind) = update.kind {
            zone.spec_kind = kind;
        }
        if let Some(masters) = &update.masters {
            zone.masters = masters.clone();
        }
        Ok(MockBackend::remote_zone(zone_id, zone))
    }

    async fn delete_zone(&self, zone_id: &str) -> ProviderResult<()> {
        self.0.check_write()?;
        self.0
            .zones
            .lock()
            .unwrap()
            .remove(zone_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))
    }

    async fn list_records(&self, zone_id: &str) -> ProviderResult<Vec<RemoteRecord>> {
        let snapshot: ProviderResult<Vec<RemoteRecord>> = {
            let zones = self.0.zones.lock().unwrap();
            zones
                .get(zone_id)
                .map(|z| z.records.values().cloned().collect())
                .ok_or_else(|| ProviderError::NotFound(zone_id.into()))
        };
        self.0.list_pause().await;
        snapshot
    }

    async fn create_record(&self, zone_id: &str, record: &RecordSpec) -> ProviderResult<RemoteRecord> {
        self.0.check_write()?;
        self.0.note(format!("create_record {} {}", record.name, record.rtype));
        let rec = self.0.record(record);
        let mut zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        zone.records.insert(rec.id.clone(), rec.clone());
        Ok(rec)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &RecordSpec,
    ) -> ProviderResult<RemoteRecord> {
        self.0.check_write()?;
        let mut zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        let existing = zone
            .records
            .get_mut(record_id)
            .ok_or_else(|| ProviderError::NotFound(record_id.into()))?;
        existing.content = record.content.clone();
        existing.ttl = record.ttl;
        existing.priority = record.priority;
        existing.disabled = record.disabled;
        existing.comment = record.comment.clone();
        Ok(existing.clone())
    }

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> ProviderResult<()> {
        self.0.check_write()?;
        self.0.note(format!("delete_record {record_id}"));
        let mut zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        zone.records
            .remove(record_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(record_id.into()))
    }

    async fn set_serial(&self, zone_id: &str, serial: u32) -> ProviderResult<()> {
        self.0.check_write()?;
        let mut zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        for rec in zone.records.values_mut().filter(|r| r.rtype == RecordType::SOA) {
            if let Some(content) = with_soa_serial(&rec.content, serial) {
                rec.content = content;
            }
        }
        Ok(())
    }

    async fn enable_dnssec(&self, zone_id: &str) -> ProviderResult<DnssecStatus> {
        self.0.check_dnssec()?;
        let zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        Ok(DnssecStatus {
            enabled: zone.keys.iter().any(|k| k.active),
            keys: zone.keys.clone(),
        })
    }

    async fn disable_dnssec(&self, zone_id: &str) -> ProviderResult<()> {
        self.0.check_dnssec()?;
        let mut zones = self.0.zones.lock().unwrap();
        if let Some(zone) = zones.get_mut(zone_id) {
            zone.keys.clear();
        }
        Ok(())
    }

    async fn list_keys(&self, zone_id: &str) -> ProviderResult<Vec<DnssecKey>> {
        let zones = self.0.zones.lock().unwrap();
        zones
            .get(zone_id)
            .map(|z| z.keys.clone())
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))
    }

    async fn generate_key(&self, zone_id: &str, req: &KeyRequest) -> ProviderResult<DnssecKey> {
        self.0.check_write()?;
        let key = DnssecKey {
            id: self.0.id(),
            key_type: req.key_type,
            algorithm: req.algorithm.clone(),
            bits: req.bits,
            active: req.active,
            published: true,
            created_at: None,
            ds: if req.key_type == KeyType::Zsk {
                Vec::new()
            } else {
                vec![format!("12345 13 2 {zone_id}")]
            },
        };
        let mut zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        zone.keys.push(key.clone());
        Ok(key)
    }

    async fn set_key_active(&self, zone_id: &str, key_id: &str, active: bool) -> ProviderResult<()> {
        self.0.check_write()?;
        let mut zones = self.0.zones.lock().unwrap();
        let zone = zones
            .get_mut(zone_id)
            .ok_or_else(|| ProviderError::NotFound(zone_id.into()))?;
        let key = zone
            .keys
            .iter_mut()
            .find(|k| k.id == key_id)
            .ok_or_else(|| ProviderError::NotFound(key_id.into()))?;
        key.active = active;
        Ok(())
    }
}

/// Fixed answers for forward, reverse and generic lookups.
#[derive(Default)]
pub struct FakeLookup {
    pub forward: Mutex<HashMap<String, Vec<IpAddr>>>,
    pub reverse: Mutex<HashMap<IpAddr, Vec<String>>>,
    pub records: Mutex<HashMap<(String, String), Vec<String>>>,
}

impl FakeLookup {
    pub fn set_records(&self, name: &str, rtype: &str, values: &[&str]) {
        self.records.lock().unwrap().insert(
            (name.to_string(), rtype.to_string()),
            values.iter().map(|v| v.to_string()).collect(),
        );
    }
}

#[async_trait]
impl DnsLookup for FakeLookup {
    async fn lookup_ip(&self, fqdn: &str) -> Result<Vec<IpAddr>, LookupError> {
        self.forward
            .lock()
            .unwrap()
            .get(&fqdn.to_ascii_lowercase())
            .cloned()
            .ok_or(LookupError::NotFound)
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, LookupError> {
        self.reverse
            .lock()
            .unwrap()
            .get(&ip)
            .cloned()
            .ok_or(LookupError::NotFound)
    }

    async fn lookup_records(&self, name: &str, rtype: &str) -> Result<Vec<String>, LookupError> {
        self.records
            .lock()
            .unwrap()
            .get(&(name.to_string(), rtype.to_string()))
            .cloned()
            .ok_or(LookupError::NotFound)
    }
}

pub struct Harness {
    pub state: SharedState,
    pub backend: Arc<MockBackend>,
    pub lookup: Arc<FakeLookup>,
    pub provider_id: i64,
}

pub async fn harness() -> Harness {
    harness_with(AppConfig {
        default_ttl: 300,
        default_nameservers: vec!["ns1.example.net.".into(), "ns2.example.net.".into()],
        ..AppConfig::default()
    })
    .await
}

pub async fn harness_with(config: AppConfig) -> Harness {
    let db = db::connect_memory().await.unwrap();
    let backend = Arc::new(MockBackend::default());
    let lookup = Arc::new(FakeLookup::default());

    let mut registry = ProviderRegistry::with_defaults();
    let shared = backend.clone();
    registry.register(
        ProviderType::Custom,
        Arc::new(move |_: &zonewarden::models::Provider, _: &zonewarden::provider::ProviderDeps| {
            Ok(Arc::new(MockProvider(shared.clone())) as Arc<dyn DnsProvider>)
        }),
    );

    let state = Arc::new(AppState::new(config, db, registry, lookup.clone()));

    let provider_id = provider_repo::insert(
        &state.db,
        &provider_repo::NewProvider {
            name: "mock".into(),
            provider_type: ProviderType::Custom,
            connection: ConnectionConfig::default(),
            policy: RateLimitPolicy::default(),
        },
    )
    .await
    .unwrap();

    Harness {
        state,
        backend,
        lookup,
        provider_id,
    }
}
