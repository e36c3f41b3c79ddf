//! Date-based SOA serials (`YYYYMMDDnn`).
use chrono::{Datelike, NaiveDate, Utc};

/// `YYYYMMDD00` for the given day.
pub fn day_base(day: NaiveDate) -> u32 {
    // u32 holds YYYYMMDDnn through the year 4294
    let ymd = day.year() as u32 * 10_000 + day.month() * 100 + day.day();
    ymd.saturating_mul(100)
}

/// Serial to write after `current` on `today`.
///
/// Same-day serials count up in the `nn` suffix; anything older restarts at `nn = 01`.
/// A serial already ahead of today's range is only ever bumped by one, so the value
/// never goes backwards. At `u32::MAX` the serial stays put; it never wraps to zero.
pub fn next_serial(current: u32, today: NaiveDate) -> u32 {
    let base = day_base(today);
    if (base..base.saturating_add(100)).contains(&current) {
        return current.saturating_add(1);
    }
    let fresh = base.saturating_add(1);
    if fresh > current {
        fresh
    } else {
        current.saturating_add(1)
    }
}

/// First serial of a freshly created zone.
pub fn initial_serial(today: NaiveDate) -> u32 {
    day_base(today) + 1
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Replace the serial field (third) of SOA content.
pub fn with_soa_serial(soa_content: &str, serial: u32) -> Option<String> {
    let mut fields: Vec<String> = soa_content.split_whitespace().map(str::to_string).collect();
    if fields.len() != 7 {
        return None;
    }
    fields[2] = serial.to_string();
    Some(fields.join(" "))
}

pub fn soa_serial(soa_content: &str) -> Option<u32> {
    soa_content.split_whitespace().nth(2)?.parse().ok()
}
