//! Name and record-content rules applied before anything is sent to a backend.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use regex::Regex;

use crate::models::{RecordType, ZoneKind};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name is empty")]
    Empty,
    #[error("name too long (max 253 characters)")]
    NameTooLong,
    #[error("label '{0}' too long (max 63 characters)")]
    LabelTooLong(String),
    #[error("label '{0}' contains invalid characters (only a-z, 0-9, '-' and '_' allowed)")]
    InvalidCharacters(String),
    #[error("label '{0}' must not start or end with '-'")]
    LeadingOrTrailingHyphen(String),
    #[error("empty label in '{0}'")]
    EmptyLabel(String),
    #[error("'{name}' is not inside zone '{zone}'")]
    OutsideZone { name: String, zone: String },
    #[error("{rtype} record content '{content}' is not a valid {expected} address")]
    InvalidAddress {
        rtype: RecordType,
        content: String,
        expected: &'static str,
    },
    #[error("{0} record content must not be empty")]
    EmptyContent(RecordType),
    #[error("{rtype} record content is invalid: {reason}")]
    InvalidContent { rtype: RecordType, reason: String },
    #[error("{0} records require a priority")]
    MissingPriority(RecordType),
    #[error("ttl {0} out of range (1..=2147483647)")]
    InvalidTtl(u32),
    #[error("secondary zones require at least one master")]
    MissingMasters,
    #[error("only secondary zones may list masters")]
    UnexpectedMasters,
    #[error("master '{0}' is not an IP address")]
    InvalidMaster(String),
}

lazy_static::lazy_static! {
    /// Letters, digits, '-' and '_' (underscore for SRV/TXT service labels).
    static ref LABEL_RE: Regex = Regex::new(r"^[a-z0-9_-]+$").unwrap();
}

pub const MAX_NAME_LEN: usize = 253;
pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_TTL: u32 = 2_147_483_647;

pub fn validate_label(label: &str) -> Result<(), ValidationError> {
    if label.is_empty() {
        return Err(ValidationError::Empty);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(ValidationError::LabelTooLong(label.to_string()));
    }
    if label == "*" {
        return Ok(());
    }
    if !LABEL_RE.is_match(&label.to_ascii_lowercase()) {
        return Err(ValidationError::InvalidCharacters(label.to_string()));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(ValidationError::LeadingOrTrailingHyphen(label.to_string()));
    }

    Ok(())
}

pub fn validate_fqdn(domain: &str) -> Result<(), ValidationError> {
    let d = domain.trim_end_matches('.');
    if d.is_empty() {
        return Err(ValidationError::Empty);
    }
    if d.len() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong);
    }
    for label in d.split('.') {
        if label.is_empty() {
            return Err(ValidationError::EmptyLabel(domain.to_string()));
        }
        validate_label(label)?;
    }
    Ok(())
}

/// Lowercase, trailing-dot canonical form.
pub fn normalize_fqdn(name: &str) -> String {
    let trimmed = name.trim().trim_end_matches('.').to_ascii_lowercase();
    format!("{trimmed}.")
}

/// Resolve a record name against its zone: `@` and empty map to the apex, relative
/// names get the zone appended, absolute names must already sit inside the zone.
pub fn normalize_record_name(name: &str, zone: &str) -> Result<String, ValidationError> {
    let zone = normalize_fqdn(zone);
    let name = name.trim();
    let fqdn = if name.is_empty() || name == "@" {
        zone.clone()
    } else if name.ends_with('.') {
        normalize_fqdn(name)
    } else {
        format!("{}.{}", name.to_ascii_lowercase(), zone)
    };

    if !is_within_zone(&fqdn, &zone) {
        return Err(ValidationError::OutsideZone {
            name: fqdn,
            zone,
        });
    }
    validate_fqdn(&fqdn)?;
    Ok(fqdn)
}

/// Case-insensitive suffix test on label boundaries.
pub fn is_within_zone(name: &str, zone: &str) -> bool {
    let name = normalize_fqdn(name);
    let zone = normalize_fqdn(zone);
    name == zone || name.ends_with(&format!(".{zone}"))
}

pub fn validate_ttl(ttl: u32) -> Result<(), ValidationError> {
    if ttl == 0 || ttl > MAX_TTL {
        return Err(ValidationError::InvalidTtl(ttl));
    }
    Ok(())
}

/// Type-specific content syntax.
pub fn validate_record_content(
    rtype: &RecordType,
    content: &str,
    priority: Option<u16>,
) -> Result<(), ValidationError> {
    let content = content.trim();
    match rtype {
        RecordType::A => {
            content
                .parse::<Ipv4Addr>()
                .map_err(|_| ValidationError::InvalidAddress {
                    rtype: rtype.clone(),
                    content: content.to_string(),
                    expected: "IPv4",
                })?;
        }
        RecordType::AAAA => {
            content
                .parse::<Ipv6Addr>()
                .map_err(|_| ValidationError::InvalidAddress {
                    rtype: rtype.clone(),
                    content: content.to_string(),
                    expected: "IPv6",
                })?;
        }
        RecordType::CNAME | RecordType::NS | RecordType::PTR => {
            if content.is_empty() {
                return Err(ValidationError::EmptyContent(rtype.clone()));
            }
            validate_fqdn(content).map_err(|e| ValidationError::InvalidContent {
                rtype: rtype.clone(),
                reason: e.to_string(),
            })?;
        }
        RecordType::MX => {
            if priority.is_none() {
                return Err(ValidationError::MissingPriority(rtype.clone()));
            }
            if content.is_empty() {
                return Err(ValidationError::EmptyContent(rtype.clone()));
            }
            // "." is the null MX
            if content != "." {
                validate_fqdn(content).map_err(|e| ValidationError::InvalidContent {
                    rtype: rtype.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        RecordType::SRV => {
            if priority.is_none() {
                return Err(ValidationError::MissingPriority(rtype.clone()));
            }
            let parts: Vec<&str> = content.split_whitespace().collect();
            let [weight, port, target] = parts.as_slice() else {
                return Err(ValidationError::InvalidContent {
                    rtype: rtype.clone(),
                    reason: "expected '<weight> <port> <target>'".into(),
                });
            };
            if weight.parse::<u16>().is_err() || port.parse::<u16>().is_err() {
                return Err(ValidationError::InvalidContent {
                    rtype: rtype.clone(),
                    reason: "weight and port must be 0-65535".into(),
                });
            }
            if *target != "." {
                validate_fqdn(target).map_err(|e| ValidationError::InvalidContent {
                    rtype: rtype.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        RecordType::SOA => {
            if content.split_whitespace().count() != 7 {
                return Err(ValidationError::InvalidContent {
                    rtype: rtype.clone(),
                    reason: "expected 7 fields".into(),
                });
            }
        }
        _ => {
            if content.is_empty() {
                return Err(ValidationError::EmptyContent(rtype.clone()));
            }
        }
    }
    Ok(())
}

/// Masters are required iff the zone is a secondary, and must be IP literals.
pub fn validate_masters(kind: ZoneKind, masters: &[String]) -> Result<(), ValidationError> {
    match kind {
        ZoneKind::Secondary if masters.is_empty() => return Err(ValidationError::MissingMasters),
        ZoneKind::Secondary => {}
        _ if !masters.is_empty() => return Err(ValidationError::UnexpectedMasters),
        _ => {}
    }
    for master in masters {
        // PowerDNS accepts "ip:port"
        let host = master
            .parse::<std::net::SocketAddr>()
            .map(|sa| sa.ip())
            .or_else(|_| master.parse::<IpAddr>());
        if host.is_err() {
            return Err(ValidationError::InvalidMaster(master.clone()));
        }
    }
    Ok(())
}
