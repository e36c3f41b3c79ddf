//! Forward-confirmed reverse DNS checks.
//!
//! The checker only produces an [`FcrDnsReport`]; JSON and text renderings are both
//! derived from that value.
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType as WireType;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::validation::normalize_fqdn;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no records")]
    NotFound,
    #[error("lookup failed: {0}")]
    Failed(String),
}

/// Resolver seam. Lookups never touch the local cache.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup_ip(&self, fqdn: &str) -> Result<Vec<IpAddr>, LookupError>;

    /// PTR targets for `ip`, as FQDNs.
    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, LookupError>;

    /// Presentation-format rdata of `rtype` records at `name`.
    async fn lookup_records(&self, name: &str, rtype: &str) -> Result<Vec<String>, LookupError>;
}

pub struct HickoryLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryLookup {
    /// Resolver built from the host's resolv.conf.
    pub fn system() -> Result<Self, ResolveError> {
        Ok(Self {
            resolver: TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }

    pub fn with_servers(servers: &[IpAddr]) -> Self {
        let mut config = ResolverConfig::new();
        for ip in servers {
            config.add_name_server(NameServerConfig::new(SocketAddr::new(*ip, 53), Protocol::Udp));
        }
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

fn lookup_error(err: ResolveError) -> LookupError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => LookupError::NotFound,
        _ => LookupError::Failed(err.to_string()),
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn lookup_ip(&self, fqdn: &str) -> Result<Vec<IpAddr>, LookupError> {
        let found = self
            .resolver
            .lookup_ip(normalize_fqdn(fqdn))
            .await
            .map_err(lookup_error)?;
        Ok(found.iter().collect())
    }

    async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, LookupError> {
        let found = self.resolver.reverse_lookup(ip).await.map_err(lookup_error)?;
        Ok(found.iter().map(|ptr| normalize_fqdn(&ptr.to_string())).collect())
    }

    async fn lookup_records(&self, name: &str, rtype: &str) -> Result<Vec<String>, LookupError> {
        let wire = WireType::from_str(rtype)
            .map_err(|e| LookupError::Failed(format!("record type {rtype}: {e}")))?;
        let found = self
            .resolver
            .lookup(normalize_fqdn(name), wire)
            .await
            .map_err(lookup_error)?;
        Ok(found.iter().map(|rdata| rdata.to_string()).collect())
    }
}

/// Why a check did not confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FcrDnsFailure {
    MissingForward,
    MissingReverse,
    Mismatch,
}

impl fmt::Display for FcrDnsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FcrDnsFailure::MissingForward => "missing-forward",
            FcrDnsFailure::MissingReverse => "missing-reverse",
            FcrDnsFailure::Mismatch => "mismatch",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FcrDnsReport {
    pub fqdn: String,
    pub ip: IpAddr,
    pub has_forward_dns: bool,
    pub has_reverse_dns: bool,
    pub has_fcr_dns: bool,
    pub forward_ip: Option<IpAddr>,
    pub reverse_fqdn: Option<String>,
    pub failures: Vec<FcrDnsFailure>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FcrDnsReport {
    fn fail(&mut self, failure: FcrDnsFailure, detail: String) {
        self.failures.push(failure);
        self.errors.push(format!("{failure}: {detail}"));
    }

    pub fn render_text(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let mut out = format!("FCrDNS check for {} ({})\n", self.fqdn, self.ip);
        out.push_str(&format!(
            "  forward DNS: {}{}\n",
            yes_no(self.has_forward_dns),
            self.forward_ip.map(|ip| format!(" -> {ip}")).unwrap_or_default()
        ));
        out.push_str(&format!(
            "  reverse DNS: {}{}\n",
            yes_no(self.has_reverse_dns),
            self.reverse_fqdn
                .as_deref()
                .map(|n| format!(" -> {n}"))
                .unwrap_or_default()
        ));
        out.push_str(&format!(
            "  FCrDNS:      {}\n",
            if self.has_fcr_dns { "PASS" } else { "FAIL" }
        ));
        for e in &self.errors {
            out.push_str(&format!("  error: {e}\n"));
        }
        for w in &self.warnings {
            out.push_str(&format!("  warning: {w}\n"));
        }
        out
    }
}

/// Forward lookup, then reverse lookup of the address the forward lookup found.
pub async fn validate(lookup: &dyn DnsLookup, fqdn: &str, ip: IpAddr) -> FcrDnsReport {
    let fqdn = normalize_fqdn(fqdn);
    let mut report = FcrDnsReport {
        fqdn: fqdn.clone(),
        ip,
        has_forward_dns: false,
        has_reverse_dns: false,
        has_fcr_dns: false,
        forward_ip: None,
        reverse_fqdn: None,
        failures: Vec::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    match lookup.lookup_ip(&fqdn).await {
        Ok(addrs) if !addrs.is_empty() => {
            report.has_forward_dns = true;
            let detected = if addrs.contains(&ip) { ip } else { addrs[0] };
            if detected != ip {
                report
                    .warnings
                    .push(format!("{fqdn} resolves to {detected}, expected {ip}"));
            }
            report.forward_ip = Some(detected);
        }
        Ok(_) | Err(LookupError::NotFound) => {
            report.fail(
                FcrDnsFailure::MissingForward,
                format!("no address records for {fqdn}"),
            );
        }
        Err(LookupError::Failed(e)) => {
            report.fail(
                FcrDnsFailure::MissingForward,
                format!("forward lookup of {fqdn} failed: {e}"),
            );
        }
    }

    let reverse_ip = report.forward_ip.unwrap_or(ip);
    match lookup.reverse_lookup(reverse_ip).await {
        Ok(names) if !names.is_empty() => {
            report.has_reverse_dns = true;
            let chosen = names
                .iter()
                .find(|n| n.eq_ignore_ascii_case(&fqdn))
                .unwrap_or(&names[0]);
            report.reverse_fqdn = Some(normalize_fqdn(chosen));
            if names.len() > 1 {
                report
                    .warnings
                    .push(format!("{reverse_ip} has {} PTR records", names.len()));
            }
        }
        Ok(_) | Err(LookupError::NotFound) => {
            report.fail(
                FcrDnsFailure::MissingReverse,
                format!("no PTR record for {reverse_ip}"),
            );
        }
        Err(LookupError::Failed(e)) => {
            report.fail(
                FcrDnsFailure::MissingReverse,
                format!("reverse lookup of {reverse_ip} failed: {e}"),
            );
        }
    }

    if report.has_forward_dns && report.has_reverse_dns {
        if report.reverse_fqdn.as_deref() == Some(fqdn.as_str()) {
            report.has_fcr_dns = true;
        } else {
            let found = report.reverse_fqdn.clone().unwrap_or_default();
            report.fail(
                FcrDnsFailure::Mismatch,
                format!("{reverse_ip} points to {found}, not {fqdn}"),
            );
        }
    }

    debug!(fqdn = %report.fqdn, ip = %ip, fcrdns = report.has_fcr_dns, "FCrDNS check");
    report
}

/// Re-run [`validate`] every `interval` until it passes or `max_wait` elapses.
/// Returns false on timeout.
pub async fn wait_for_propagation(
    lookup: &dyn DnsLookup,
    fqdn: &str,
    ip: IpAddr,
    max_wait: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + max_wait;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let report = validate(lookup, fqdn, ip).await;
        if report.has_fcr_dns {
            info!(fqdn, %ip, attempt, "FCrDNS propagated");
            return true;
        }
        let now = Instant::now();
        if now + interval > deadline {
            warn!(fqdn, %ip, attempt, ?max_wait, errors = ?report.errors, "FCrDNS did not propagate in time");
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct StaticLookup {
        forward: HashMap<String, Vec<IpAddr>>,
        reverse: HashMap<IpAddr, Vec<String>>,
        broken: Mutex<bool>,
    }

    #[async_trait]
    impl DnsLookup for StaticLookup {
        async fn lookup_ip(&self, fqdn: &str) -> Result<Vec<IpAddr>, LookupError> {
            if *self.broken.lock().unwrap() {
                return Err(LookupError::Failed("timeout".into()));
            }
            self.forward.get(fqdn).cloned().ok_or(LookupError::NotFound)
        }

        async fn reverse_lookup(&self, ip: IpAddr) -> Result<Vec<String>, LookupError> {
            self.reverse.get(&ip).cloned().ok_or(LookupError::NotFound)
        }

        async fn lookup_records(&self, _: &str, _: &str) -> Result<Vec<String>, LookupError> {
            Err(LookupError::NotFound)
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn confirmed_when_both_directions_agree() {
        let mut lookup = StaticLookup::default();
        lookup
            .forward
            .insert("www.example.com.".into(), vec![ip("192.0.2.10")]);
        lookup
            .reverse
            .insert(ip("192.0.2.10"), vec!["WWW.Example.com.".into()]);

        let report = validate(&lookup, "www.example.com", ip("192.0.2.10")).await;
        assert!(report.has_forward_dns && report.has_reverse_dns && report.has_fcr_dns);
        assert!(report.errors.is_empty());
        assert_eq!(report.reverse_fqdn.as_deref(), Some("www.example.com."));
    }

    #[tokio::test]
    async fn forward_only_is_missing_reverse() {
        let mut lookup = StaticLookup::default();
        lookup
            .forward
            .insert("www.example.com.".into(), vec![ip("192.0.2.10")]);

        let report = validate(&lookup, "www.example.com.", ip("192.0.2.10")).await;
        assert!(report.has_forward_dns);
        assert!(!report.has_reverse_dns);
        assert!(!report.has_fcr_dns);
        assert_eq!(report.failures, vec![FcrDnsFailure::MissingReverse]);
        assert!(report.errors[0].starts_with("missing-reverse"));
    }

    #[tokio::test]
    async fn detected_address_drives_reverse_lookup() {
        let mut lookup = StaticLookup::default();
        lookup
            .forward
            .insert("mail.example.com.".into(), vec![ip("192.0.2.20")]);
        lookup
            .reverse
            .insert(ip("192.0.2.20"), vec!["other.example.net.".into()]);

        let report = validate(&lookup, "mail.example.com.", ip("192.0.2.99")).await;
        assert_eq!(report.forward_ip, Some(ip("192.0.2.20")));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.failures, vec![FcrDnsFailure::Mismatch]);
    }

    #[tokio::test]
    async fn json_uses_camel_case_keys() {
        let lookup = StaticLookup::default();
        let report = validate(&lookup, "nothing.example.", ip("2001:db8::1")).await;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["hasForwardDns"], false);
        assert_eq!(json["hasFcrDns"], false);
        assert!(json.get("reverseFqdn").is_some());
        assert_eq!(json["failures"][0], "missing-forward");
        assert!(report.render_text().contains("FCrDNS:      FAIL"));
    }

    struct EventualLookup {
        calls: AtomicU32,
        ready_after: u32,
    }

    #[async_trait]
    impl DnsLookup for EventualLookup {
        async fn lookup_ip(&self, _: &str) -> Result<Vec<IpAddr>, LookupError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.ready_after {
                Err(LookupError::Failed("SERVFAIL".into()))
            } else {
                Ok(vec![ip("192.0.2.1")])
            }
        }

        async fn reverse_lookup(&self, _: IpAddr) -> Result<Vec<String>, LookupError> {
            Ok(vec!["host.example.com.".into()])
        }

        async fn lookup_records(&self, _: &str, _: &str) -> Result<Vec<String>, LookupError> {
            Err(LookupError::NotFound)
        }
    }

    #[tokio::test]
    async fn waits_through_transient_failures() {
        let lookup = EventualLookup {
            calls: AtomicU32::new(0),
            ready_after: 2,
        };
        let ok = wait_for_propagation(
            &lookup,
            "host.example.com.",
            ip("192.0.2.1"),
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await;
        assert!(ok);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_with_false() {
        let lookup = StaticLookup::default();
        *lookup.broken.lock().unwrap() = true;
        let ok = wait_for_propagation(
            &lookup,
            "host.example.com.",
            ip("192.0.2.1"),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;
        assert!(!ok);
    }
}
