//! Cached entities: providers, zones, records, and the typed views of their JSON columns.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend family. Exactly one client factory resolves per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    PowerDns,
    Cloudflare,
    Route53,
    Dnsmasq,
    Custom,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::PowerDns => "powerdns",
            ProviderType::Cloudflare => "cloudflare",
            ProviderType::Route53 => "route53",
            ProviderType::Dnsmasq => "dnsmasq",
            ProviderType::Custom => "custom",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "powerdns" | "pdns" => Ok(ProviderType::PowerDns),
            "cloudflare" | "cf" => Ok(ProviderType::Cloudflare),
            "route53" => Ok(ProviderType::Route53),
            "dnsmasq" => Ok(ProviderType::Dnsmasq),
            "custom" => Ok(ProviderType::Custom),
            other => Err(format!("unknown provider type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneKind {
    Native,
    Primary,
    Secondary,
    Forwarded,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Native => "Native",
            ZoneKind::Primary => "Primary",
            ZoneKind::Secondary => "Secondary",
            ZoneKind::Forwarded => "Forwarded",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // PowerDNS still reports the Master/Slave spellings on older servers.
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(ZoneKind::Native),
            "primary" | "master" => Ok(ZoneKind::Primary),
            "secondary" | "slave" => Ok(ZoneKind::Secondary),
            "forwarded" => Ok(ZoneKind::Forwarded),
            other => Err(format!("unknown zone kind '{other}'")),
        }
    }
}

/// Resource record type. Types without dedicated handling travel as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    AAAA,
    CAA,
    CNAME,
    DS,
    MX,
    NS,
    PTR,
    SOA,
    SRV,
    TXT,
    Other(String),
}

impl RecordType {
    pub fn as_str(&self) -> &str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CAA => "CAA",
            RecordType::CNAME => "CNAME",
            RecordType::DS => "DS",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::PTR => "PTR",
            RecordType::SOA => "SOA",
            RecordType::SRV => "SRV",
            RecordType::TXT => "TXT",
            RecordType::Other(s) => s,
        }
    }

    pub fn is_address(&self) -> bool {
        matches!(self, RecordType::A | RecordType::AAAA)
    }

    /// Types whose priority travels outside the content string.
    pub fn has_priority(&self) -> bool {
        matches!(self, RecordType::MX | RecordType::SRV)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Ok(match upper.as_str() {
            "" => return Err("record type is empty".into()),
            "A" => RecordType::A,
            "AAAA" => RecordType::AAAA,
            "CAA" => RecordType::CAA,
            "CNAME" => RecordType::CNAME,
            "DS" => RecordType::DS,
            "MX" => RecordType::MX,
            "NS" => RecordType::NS,
            "PTR" => RecordType::PTR,
            "SOA" => RecordType::SOA,
            "SRV" => RecordType::SRV,
            "TXT" => RecordType::TXT,
            _ if upper.chars().all(|c| c.is_ascii_alphanumeric()) => RecordType::Other(upper),
            _ => return Err(format!("invalid record type '{s}'")),
        })
    }
}

impl TryFrom<String> for RecordType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecordType> for String {
    fn from(value: RecordType) -> Self {
        value.as_str().to_string()
    }
}

/// Backoff policy for rate-limited backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

/// Connection parameters. Known keys are typed; anything else a backend needs is kept
/// in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_api_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub provider_type: ProviderType,
    pub active: bool,
    #[serde(skip_serializing)]
    pub connection: ConnectionConfig,
    pub policy: RateLimitPolicy,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    Ksk,
    Zsk,
    Csk,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyType::Ksk => "KSK",
            KeyType::Zsk => "ZSK",
            KeyType::Csk => "CSK",
        })
    }
}

impl FromStr for KeyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ksk" => Ok(KeyType::Ksk),
            "zsk" => Ok(KeyType::Zsk),
            "csk" => Ok(KeyType::Csk),
            other => Err(format!("unknown key type '{other}'")),
        }
    }
}

/// DNSSEC key as held by the backend and mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnssecKey {
    pub id: String,
    pub key_type: KeyType,
    pub algorithm: String,
    #[serde(default)]
    pub bits: Option<u32>,
    pub active: bool,
    #[serde(default)]
    pub published: bool,
    /// Backend creation time when known, otherwise the first time it was observed here.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ds: Vec<String>,
}

/// Last-fetched remote representation of a zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneProviderData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_serial: Option<u32>,
    #[serde(default)]
    pub dnssec_managed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dnssec_keys: Vec<DnssecKey>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Last-fetched remote representation of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordProviderData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ZoneProviderData {
    /// Typed fields are lifted out of `raw`; everything else lands in `extra`.
    pub fn from_raw(raw: &Value) -> Self {
        serde_json::from_value(raw.clone()).unwrap_or_else(|_| ZoneProviderData {
            extra: raw.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        })
    }
}

impl RecordProviderData {
    pub fn from_raw(raw: &Value) -> Self {
        serde_json::from_value(raw.clone()).unwrap_or_else(|_| RecordProviderData {
            extra: raw.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        })
    }
}

/// Persisted DNSSEC lifecycle state of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnssecState {
    Disabled,
    Enabling,
    KeysPending,
    KeysActive,
    RolloverInProgress,
    Disabling,
}

impl DnssecState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnssecState::Disabled => "disabled",
            DnssecState::Enabling => "enabling",
            DnssecState::KeysPending => "keys_pending",
            DnssecState::KeysActive => "keys_active",
            DnssecState::RolloverInProgress => "rollover_in_progress",
            DnssecState::Disabling => "disabling",
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(
            self,
            DnssecState::KeysPending | DnssecState::KeysActive | DnssecState::RolloverInProgress
        )
    }
}

impl fmt::Display for DnssecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DnssecState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(DnssecState::Disabled),
            "enabling" => Ok(DnssecState::Enabling),
            "keys_pending" => Ok(DnssecState::KeysPending),
            "keys_active" => Ok(DnssecState::KeysActive),
            "rollover_in_progress" => Ok(DnssecState::RolloverInProgress),
            "disabling" => Ok(DnssecState::Disabling),
            other => Err(format!("unknown dnssec state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Zone {
    pub id: i64,
    pub provider_id: i64,
    pub name: String,
    pub kind: ZoneKind,
    pub masters: Vec<String>,
    pub serial: u32,
    pub ttl: u32,
    pub dnssec_enabled: bool,
    pub auto_dnssec: bool,
    pub dnssec_state: DnssecState,
    pub external_id: Option<String>,
    pub provider_data: ZoneProviderData,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Zone {
    /// Identifier to hand to the backend.
    pub fn remote_id(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub id: i64,
    pub zone_id: i64,
    pub name: String,
    pub rtype: RecordType,
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u16>,
    pub disabled: bool,
    pub comment: Option<String>,
    pub external_id: Option<String>,
    pub provider_data: RecordProviderData,
    pub last_synced: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_round_trips_through_strings() {
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::AAAA);
        assert_eq!(
            "tlsa".parse::<RecordType>().unwrap(),
            RecordType::Other("TLSA".into())
        );
        assert!("A B".parse::<RecordType>().is_err());
        let json = serde_json::to_string(&RecordType::MX).unwrap();
        assert_eq!(json, "\"MX\"");
    }

    #[test]
    fn zone_kind_accepts_legacy_spellings() {
        assert_eq!("Master".parse::<ZoneKind>().unwrap(), ZoneKind::Primary);
        assert_eq!("slave".parse::<ZoneKind>().unwrap(), ZoneKind::Secondary);
    }

    #[test]
    fn connection_config_keeps_unknown_keys() {
        let cfg: ConnectionConfig = serde_json::from_value(serde_json::json!({
            "endpoint": "http://127.0.0.1:8081/api/v1",
            "api_key": "secret",
            "vendor_flag": true
        }))
        .unwrap();
        assert_eq!(cfg.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.extra.get("vendor_flag"), Some(&Value::Bool(true)));

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["vendor_flag"], Value::Bool(true));
    }

    #[test]
    fn provider_data_lifts_known_fields() {
        let raw = serde_json::json!({
            "nameservers": ["ns1.example.net."],
            "remote_serial": 2024010101u32,
            "account": "ops"
        });
        let data = ZoneProviderData::from_raw(&raw);
        assert_eq!(data.nameservers, vec!["ns1.example.net.".to_string()]);
        assert_eq!(data.remote_serial, Some(2024010101));
        assert_eq!(data.extra.get("account"), Some(&Value::from("ops")));
    }
}
