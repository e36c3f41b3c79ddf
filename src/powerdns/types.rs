use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdnsZone {
    pub id: String,   // "example.com."
    pub name: String, // "example.com."
    #[serde(rename = "type", default)]
    pub zone_type: Option<String>, // "Zone"
    #[serde(default)]
    pub kind: String, // "Native", "Master", "Slave", ...
    #[serde(default)]
    pub serial: Option<u32>,
    #[serde(default)]
    pub masters: Vec<String>,
    #[serde(default)]
    pub dnssec: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rrsets: Option<Vec<PdnsRrset>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdnsRrset {
    pub name: String, // "www.example.com."
    #[serde(rename = "type")]
    pub rrtype: String, // "A", "NS", ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changetype: Option<String>, // "REPLACE" / "DELETE" when patching
    #[serde(default)]
    pub records: Vec<PdnsRecord>,
    #[serde(default)]
    pub comments: Vec<PdnsComment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdnsRecord {
    pub content: String, // "192.0.2.1" or "10 mail.example.com."
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdnsComment {
    pub content: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub modified_at: u64,
}

// Used when creating a zone
#[derive(Debug, Serialize, Deserialize)]
pub struct PdnsZoneCreate {
    pub name: String, // "example.com."
    pub kind: String, // "Native"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masters: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>, // ["ns1.example.net.", "ns2.example.net."]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rrsets: Vec<PdnsRrset>,
}

// PUT /zones/{zone}; only the present fields are changed
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PdnsZoneUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masters: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_rectify: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdnsCryptokey {
    pub id: u64,
    pub keytype: String, // "ksk" / "zsk" / "csk"
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub bits: Option<u32>,
    #[serde(default)]
    pub dnskey: Option<String>,
    #[serde(default)]
    pub ds: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PdnsCryptokeyCreate {
    pub keytype: String,
    pub active: bool,
    pub algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PdnsErrorBody {
    pub error: String,
}
