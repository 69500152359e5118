//! Wall-clock timestamp helpers shared by the session files, the
//! telemetry records, and the final report.
//!
//! Telemetry timestamps are milliseconds since the Unix epoch; formatted
//! timestamps are simplified ISO 8601 (`YYYY-MM-DDTHH:MM:SS[.mmm]Z`),
//! always UTC. Timestamps never predate the epoch, so the conversion
//! only has to walk forward.

use std::time::{SystemTime, UNIX_EPOCH};

/// Days per month in a common year, January first.
const MONTH_LENGTHS: [u64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Current wall-clock time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Format the current time as an ISO 8601 string (second precision).
#[must_use]
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_epoch_secs(secs)
}

/// Format epoch milliseconds as an ISO 8601 string with milliseconds.
#[must_use]
pub fn epoch_ms_to_iso(millis: u64) -> String {
    let secs = millis / 1000;
    let ms_part = millis % 1000;
    let base = format_epoch_secs(secs);
    // Swap the trailing 'Z' for ".mmmZ"
    format!("{}.{ms_part:03}Z", &base[..base.len() - 1])
}

fn is_leap_year(year: u64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Split a day count since 1970-01-01 into a calendar date by walking
/// years, then months. Sessions live decades from the epoch at most, so
/// the year walk stays short.
fn civil_date(mut days: u64) -> (u64, u64, u64) {
    let mut year = 1970;
    loop {
        let year_len = if is_leap_year(year) { 366 } else { 365 };
        if days < year_len {
            break;
        }
        days -= year_len;
        year += 1;
    }

    let mut month = 1;
    for (index, &base_len) in MONTH_LENGTHS.iter().enumerate() {
        let month_len = if index == 1 && is_leap_year(year) {
            base_len + 1
        } else {
            base_len
        };
        if days < month_len {
            break;
        }
        days -= month_len;
        month += 1;
    }

    (year, month, days + 1)
}

fn format_epoch_secs(secs: u64) -> String {
    let (year, month, day) = civil_date(secs / 86_400);
    let clock = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
        clock / 3_600,
        (clock % 3_600) / 60,
        clock % 60,
    )
}
