//! Wall-clock helpers for display timestamps

use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day]/[month]/[year], [hour]:[minute]:[second]");
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[day]/[month]/[year]");

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `dd/mm/yyyy, HH:MM:SS`
pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// `dd/mm/yyyy`
pub fn format_date(at: OffsetDateTime) -> String {
    at.format(DATE_FORMAT).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

pub fn local_timestamp() -> String {
    format_timestamp(now_local_or_utc())
}

pub fn local_date() -> String {
    format_date(now_local_or_utc())
}

pub fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_timestamp_layout() {
        let at = datetime!(2024-01-15 14:30:05 UTC);
        assert_eq!(format_timestamp(at), "15/01/2024, 14:30:05");
        assert_eq!(format_date(at), "15/01/2024");
    }
}
