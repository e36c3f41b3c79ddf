use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// v4 response envelope.
#[derive(Debug, Deserialize)]
pub struct CfEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub errors: Vec<CfMessage>,
    #[serde(default)]
    pub result_info: Option<CfResultInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CfMessage {
    #[serde(default)]
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CfResultInfo {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub total_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfZone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub name_servers: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfDnsRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String, // no trailing dot
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub ttl: u32, // 1 means "automatic"
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub proxied: Option<bool>,
    #[serde(default)]
    pub comment: Option<String>,
    /// structured fields for SRV/CAA
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CfRecordBody {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub ttl: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CfZoneCreate {
    pub name: String,
    pub account: CfAccountRef,
    #[serde(rename = "type")]
    pub zone_type: String, // "full"
}

#[derive(Debug, Clone, Serialize)]
pub struct CfAccountRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfDnssec {
    pub status: String, // "active", "pending", "disabled", ...
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub key_tag: Option<u32>,
    #[serde(default)]
    pub ds: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub modified_on: Option<String>,
}
