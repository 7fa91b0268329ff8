//! Wall-clock helpers. Rows store UTC; people read the operator's local time.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

pub fn fixed_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

pub fn local_now(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

/// Renders a stored timestamp as `YYYY-MM-DD HH:MM` local time. Unparseable
/// values are shown as stored.
pub fn display_local(stored: &str, offset: FixedOffset) -> String {
    match DateTime::parse_from_rfc3339(stored) {
        Ok(at) => at.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => stored.to_string(),
    }
}

pub fn local_date(stored: &str, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(stored)
        .ok()
        .map(|at| at.with_timezone(&offset).date_naive())
}

/// UTC instant of local midnight starting the day that contains `now`.
pub fn start_of_local_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let midnight = now
        .with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or(now)
}
