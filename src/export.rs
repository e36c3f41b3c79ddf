//! BIND-style zone file rendering from the local cache.
use std::fmt::Write as _;

use crate::AppState;
use crate::db::record_repo;
use crate::error::AppResult;
use crate::models::{Record, RecordType, Zone};

pub async fn export_zone(state: &AppState, zone_id: i64) -> AppResult<String> {
    let zone = state.zone(zone_id).await?;
    let records = record_repo::list(&state.db, zone.id).await?;
    Ok(render_zone(&zone, &records))
}

/// Owner name relative to the origin; `@` for the apex.
fn relative_name(name: &str, origin: &str) -> String {
    if name.eq_ignore_ascii_case(origin) {
        return "@".to_string();
    }
    match name.strip_suffix(origin).and_then(|n| n.strip_suffix('.')) {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => name.to_string(),
    }
}

fn rdata(r: &Record) -> String {
    match (&r.rtype, r.priority) {
        (RecordType::MX | RecordType::SRV, Some(p)) => format!("{p} {}", r.content),
        (RecordType::TXT, _) if !r.content.starts_with('"') => {
            format!("\"{}\"", r.content.replace('\\', "\\\\").replace('"', "\\\""))
        }
        _ => r.content.clone(),
    }
}

pub fn render_zone(zone: &Zone, records: &[Record]) -> String {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| {
        let key = |r: &Record| (relative_name(&r.name, &zone.name) != "@", r.name.to_ascii_lowercase());
        key(a)
            .cmp(&key(b))
            .then_with(|| a.rtype.as_str().cmp(b.rtype.as_str()))
            .then_with(|| a.content.cmp(&b.content))
    });

    let mut out = String::new();
    let _ = writeln!(out, "; zone {} (serial {})", zone.name, zone.serial);
    let _ = writeln!(out, "$ORIGIN {}", zone.name);
    let _ = writeln!(out, "$TTL {}", zone.ttl);
    for r in sorted {
        let prefix = if r.disabled { "; " } else { "" };
        let _ = writeln!(
            out,
            "{prefix}{}\t{}\tIN\t{}\t{}",
            relative_name(&r.name, &zone.name),
            r.ttl,
            r.rtype,
            rdata(r)
        );
    }
    out
}
