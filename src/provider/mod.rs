//! Uniform zone/record contract over the backend wire protocols.
pub mod cloudflare;
pub mod powerdns;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{DnssecKey, KeyType, ProviderType, RecordType, ZoneKind};
use crate::tunnel::TunnelError;

pub use registry::{ProviderDeps, ProviderFactory, ProviderRegistry};

/// Classified cause of a failed backend call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication rejected ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("could not decode backend response: {0}")]
    Decode(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication {
                status: status.as_u16(),
                message,
            },
            StatusCode::NOT_FOUND => ProviderError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after: None },
            s if s.is_server_error() => {
                ProviderError::Transient(format!("{}: {message}", s.as_u16()))
            }
            s => ProviderError::Rejected {
                status: s.as_u16(),
                message,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status, err.to_string())
        } else {
            ProviderError::Transient(err.to_string())
        }
    }
}

/// Who holds the DNSSEC keys for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DnssecMode {
    /// The backend signs and rolls keys itself (CloudFlare).
    ProviderManaged,
    /// Keys are generated and activated explicitly (PowerDNS).
    SelfManaged,
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub dnssec: DnssecMode,
    /// Backend bumps the SOA serial on its own.
    pub manages_serial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteZone {
    pub id: String,
    pub name: String,
    pub kind: Option<ZoneKind>,
    pub serial: Option<u32>,
    pub masters: Vec<String>,
    pub nameservers: Vec<String>,
    pub dnssec: bool,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    pub id: String,
    pub name: String,
    pub rtype: RecordType,
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u16>,
    pub disabled: bool,
    pub comment: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSpec {
    pub name: String,
    pub kind: ZoneKind,
    pub masters: Vec<String>,
    pub nameservers: Vec<String>,
    pub ttl: u32,
    pub serial: u32,
    pub soa_contact: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneUpdate {
    pub kind: Option<ZoneKind>,
    pub masters: Option<Vec<String>>,
    pub ttl: Option<u32>,
}

impl ZoneUpdate {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.masters.is_none() && self.ttl.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSpec {
    pub name: String,
    pub rtype: RecordType,
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u16>,
    pub disabled: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyRequest {
    pub key_type: KeyType,
    pub algorithm: String,
    pub bits: Option<u32>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnssecStatus {
    pub enabled: bool,
    pub keys: Vec<DnssecKey>,
}

/// One implementation per backend type, selected through [`ProviderRegistry`].
#[async_trait]
pub trait DnsProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn capabilities(&self) -> Capabilities;

    async fn test_connection(&self) -> ProviderResult<()>;

    async fn list_zones(&self) -> ProviderResult<Vec<RemoteZone>>;

    async fn get_zone(&self, zone_id: &str) -> ProviderResult<RemoteZone>;

    async fn create_zone(&self, spec: &ZoneSpec) -> ProviderResult<RemoteZone>;

    async fn update_zone(&self, zone_id: &str, update: &ZoneUpdate) -> ProviderResult<RemoteZone>;

    async fn delete_zone(&self, zone_id: &str) -> ProviderResult<()>;

    async fn list_records(&self, zone_id: &str) -> ProviderResult<Vec<RemoteRecord>>;

    async fn create_record(&self, zone_id: &str, record: &RecordSpec)
    -> ProviderResult<RemoteRecord>;

    /// `record` carries the full desired state; name and type stay as they were.
    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &RecordSpec,
    ) -> ProviderResult<RemoteRecord>;

    async fn delete_record(&self, zone_id: &str, record_id: &str) -> ProviderResult<()>;

    /// Write the SOA serial. Only called when `manages_serial` is false.
    async fn set_serial(&self, _zone_id: &str, _serial: u32) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("explicit SOA serial"))
    }

    async fn enable_dnssec(&self, _zone_id: &str) -> ProviderResult<DnssecStatus> {
        Err(ProviderError::Unsupported("DNSSEC"))
    }

    async fn disable_dnssec(&self, _zone_id: &str) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("DNSSEC"))
    }

    async fn list_keys(&self, _zone_id: &str) -> ProviderResult<Vec<DnssecKey>> {
        Err(ProviderError::Unsupported("DNSSEC"))
    }

    async fn generate_key(&self, _zone_id: &str, _req: &KeyRequest) -> ProviderResult<DnssecKey> {
        Err(ProviderError::Unsupported("DNSSEC key generation"))
    }

    async fn set_key_active(
        &self,
        _zone_id: &str,
        _key_id: &str,
        _active: bool,
    ) -> ProviderResult<()> {
        Err(ProviderError::Unsupported("DNSSEC key activation"))
    }
}

/// MX/SRV content as backends expect it: priority first.
pub fn content_with_priority(rtype: &RecordType, content: &str, priority: Option<u16>) -> String {
    match (rtype.has_priority(), priority) {
        (true, Some(p)) => format!("{p} {content}"),
        _ => content.to_string(),
    }
}

/// Inverse of [`content_with_priority`].
pub fn split_priority(rtype: &RecordType, content: &str) -> (Option<u16>, String) {
    if !rtype.has_priority() {
        return (None, content.to_string());
    }
    match content.split_once(char::is_whitespace) {
        Some((head, rest)) => match head.parse::<u16>() {
            Ok(p) => (Some(p), rest.trim().to_string()),
            Err(_) => (None, content.to_string()),
        },
        None => (None, content.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNAUTHORIZED, "bad key"),
            ProviderError::Authentication { status: 401, .. }
        ));
        assert!(ProviderError::from_status(StatusCode::NOT_FOUND, "zone").is_not_found());
        assert!(matches!(
            ProviderError::from_status(StatusCode::UNPROCESSABLE_ENTITY, "bad rrset"),
            ProviderError::Rejected { status: 422, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            ProviderError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited { .. }
        ));
    }

    #[test]
    fn priority_travels_in_front_of_content() {
        assert_eq!(
            content_with_priority(&RecordType::MX, "mail.example.com.", Some(10)),
            "10 mail.example.com."
        );
        assert_eq!(
            split_priority(&RecordType::SRV, "10 5 5060 sip.example.com."),
            (Some(10), "5 5060 sip.example.com.".to_string())
        );
        assert_eq!(
            split_priority(&RecordType::A, "192.0.2.1"),
            (None, "192.0.2.1".to_string())
        );
    }
}
