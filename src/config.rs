use std::time::Duration;

use crate::reverse::ReversePolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// TTL applied when a request does not carry one.
    pub default_ttl: u32,
    pub default_nameservers: Vec<String>, // "ns1.example.net.", ...
    /// SOA rname; `None` means hostmaster.<zone>.
    pub soa_contact: Option<String>,
    pub reverse: ReversePolicy,
    pub propagation: PropagationConfig,
    pub dnssec: DnssecConfig,
    pub ssh_binary: String,
    pub api_token: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PropagationConfig {
    pub max_wait: Duration,
    pub interval: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DnssecConfig {
    pub key_lifetime_days: i64,
    pub rollover_warning_days: i64,
    pub default_algorithm: &'static str,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_ttl: 3600,
            default_nameservers: Vec::new(),
            soa_contact: None,
            reverse: ReversePolicy::default(),
            propagation: PropagationConfig {
                max_wait: Duration::from_secs(300),
                interval: Duration::from_secs(10),
            },
            dnssec: DnssecConfig {
                key_lifetime_days: 365,
                rollover_warning_days: 30,
                default_algorithm: "ecdsap256sha256",
            },
            ssh_binary: "ssh".into(),
            api_token: None,
        }
    }
}

impl AppConfig {
    /// SOA contact for a zone, falling back to hostmaster.<zone>.
    pub fn soa_contact_for(&self, zone: &str) -> String {
        match &self.soa_contact {
            Some(contact) => format!("{}.", contact.trim_end_matches('.')),
            None => format!("hostmaster.{}.", zone.trim_end_matches('.')),
        }
    }
}
