//! ---
//! monq_section: "01-shared-runtime"
//! monq_subsection: "module"
//! monq_type: "source"
//! monq_scope: "code"
//! monq_description: "Shared primitives and utilities for the recovery runtime."
//! monq_version: "v0.0.0-prealpha"
//! monq_owner: "tbd"
//! ---
use chrono::{DateTime, NaiveDateTime, Utc};

/// Extract the embedded timestamp from a reconciler log line.
///
/// The reconciler prefixes every line with either an RFC 3339 stamp or the
/// classic `YYYY-MM-DD HH:MM:SS.ffffff` form. Log windows are re-fetched and
/// may overlap, so callers order events by this value rather than by arrival.
pub fn parse_log_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let head = line.trim_start();

    if let Some(token) = head.split_whitespace().next() {
        if let Ok(stamp) = DateTime::parse_from_rfc3339(token) {
            return Some(stamp.with_timezone(&Utc));
        }
    }

    let mut parts = head.split_whitespace();
    let date = parts.next()?;
    let clock = parts.next()?;
    let joined = format!("{} {}", date, clock);
    NaiveDateTime::parse_from_str(&joined, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_reconciler_format() {
        let stamp =
            parse_log_timestamp("2026-08-05 08:23:52.712525 E | op-mon: mon quorum status failed")
                .unwrap();
        assert_eq!(stamp.hour(), 8);
        assert_eq!(stamp.minute(), 23);
        assert_eq!(stamp.second(), 52);
    }

    #[test]
    fn parses_rfc3339_format() {
        let stamp = parse_log_timestamp("2026-08-05T08:23:52Z health checker failed").unwrap();
        assert_eq!(stamp.hour(), 8);
    }

    #[test]
    fn rejects_unstamped_lines() {
        assert!(parse_log_timestamp("no timestamp here").is_none());
        assert!(parse_log_timestamp("").is_none());
    }

    #[test]
    fn orders_by_embedded_stamp() {
        let older = parse_log_timestamp("2026-08-05 08:00:00.000000 I | op-mon: ok").unwrap();
        let newer = parse_log_timestamp("2026-08-05 09:00:00.000000 E | op-mon: failed").unwrap();
        assert!(older < newer);
    }
}
