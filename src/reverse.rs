//! Reverse-zone arithmetic for PTR records.
//!
//! IPv4 reverse zones are cut at `/24`: `192.168.1.100` lives in
//! `1.168.192.in-addr.arpa.` under the owner label `100`.
//!
//! IPv6 reverse zones are cut on a nibble boundary given by [`ReversePolicy`]. By
//! default the zone holds 31 reversed nibbles and the owner name is the single last
//! nibble of the address; deployments delegating at `/64` set the boundary to 16. The
//! owner name always holds the remaining reversed nibbles, so `name + "." + zone` is
//! the full `ip6.arpa.` pointer name.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;

const IPV6_NIBBLES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReversePolicy {
    ipv6_zone_nibbles: usize,
}

impl Default for ReversePolicy {
    fn default() -> Self {
        Self {
            ipv6_zone_nibbles: IPV6_NIBBLES - 1,
        }
    }
}

impl ReversePolicy {
    /// `nibbles` is the IPv6 prefix length divided by four; 1..=31.
    pub fn new(nibbles: usize) -> Result<Self, String> {
        if !(1..IPV6_NIBBLES).contains(&nibbles) {
            return Err(format!(
                "ipv6 reverse zone boundary must be 1..=31 nibbles, got {nibbles}"
            ));
        }
        Ok(Self {
            ipv6_zone_nibbles: nibbles,
        })
    }

    pub fn ipv6_zone_nibbles(&self) -> usize {
        self.ipv6_zone_nibbles
    }
}

/// Where the PTR for an address lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PtrLocation {
    pub zone: String,
    pub name: String,
}

impl PtrLocation {
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.name, self.zone)
    }
}

pub fn ptr_location(ip: IpAddr, policy: &ReversePolicy) -> PtrLocation {
    match ip {
        IpAddr::V4(v4) => ipv4_location(v4),
        IpAddr::V6(v6) => ipv6_location(v6, policy.ipv6_zone_nibbles),
    }
}

pub fn reverse_zone(ip: IpAddr, policy: &ReversePolicy) -> String {
    ptr_location(ip, policy).zone
}

pub fn reverse_record_name(ip: IpAddr, policy: &ReversePolicy) -> String {
    ptr_location(ip, policy).name
}

/// Full pointer owner name, independent of any zone cut.
pub fn reverse_pointer_name(ip: IpAddr) -> String {
    ptr_location(ip, &ReversePolicy::default()).fqdn()
}

fn ipv4_location(ip: Ipv4Addr) -> PtrLocation {
    let [a, b, c, d] = ip.octets();
    PtrLocation {
        zone: format!("{c}.{b}.{a}.in-addr.arpa."),
        name: d.to_string(),
    }
}

fn ipv6_location(ip: Ipv6Addr, zone_nibbles: usize) -> PtrLocation {
    let nibbles = ipv6_nibbles(ip);
    let (prefix, host) = nibbles.split_at(zone_nibbles);

    let zone = reversed_labels(prefix);
    let name = reversed_labels(host);
    PtrLocation {
        zone: format!("{zone}.ip6.arpa."),
        name,
    }
}

/// The 32 hex digits of the fully expanded address, most significant first.
fn ipv6_nibbles(ip: Ipv6Addr) -> Vec<char> {
    ip.octets()
        .iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0f])
        .map(|n| char::from_digit(u32::from(n), 16).unwrap_or('0'))
        .collect()
}

fn reversed_labels(nibbles: &[char]) -> String {
    nibbles
        .iter()
        .rev()
        .map(char::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
