//! Duration math for work sessions.
//!
//! Sessions are bounded by times of day with no date on the end marker, so
//! an end earlier than the start means the session ran past midnight and
//! gets a 24 hour wrap. Equal start and end is a zero-length session, not
//! a full day.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, NaiveTime, Utc};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Hours between two times of day, wrapping overnight, scaled to two
/// decimal places with half-up rounding.
pub(crate) fn session_hours(start: NaiveTime, end: NaiveTime) -> BigDecimal {
    let mut minutes = (end - start).num_minutes();
    if minutes < 0 {
        minutes += MINUTES_PER_DAY;
    }
    hours_from_minutes(minutes)
}

/// Hours between two instants, floored at zero. Used by the start/stop
/// timer where both ends carry full timestamps.
pub(crate) fn elapsed_hours(start: DateTime<Utc>, end: DateTime<Utc>) -> BigDecimal {
    let minutes = end.signed_duration_since(start).num_minutes().max(0);
    hours_from_minutes(minutes)
}

pub(crate) fn hours_from_minutes(minutes: i64) -> BigDecimal {
    let hours = BigDecimal::from(minutes) / BigDecimal::from(60);
    hours.with_scale_round(2, RoundingMode::HalfUp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_same_day_session() {
        assert_eq!(session_hours(t(9, 0), t(17, 30)).to_string(), "8.50");
    }

    #[test]
    fn test_overnight_session_wraps() {
        assert_eq!(session_hours(t(22, 0), t(6, 0)).to_string(), "8.00");
        assert_eq!(session_hours(t(22, 0), t(2, 0)).to_string(), "4.00");
        assert_eq!(session_hours(t(23, 30), t(0, 15)).to_string(), "0.75");
    }

    #[test]
    fn test_zero_length_session() {
        assert_eq!(session_hours(t(9, 0), t(9, 0)).to_string(), "0.00");
    }

    #[test]
    fn test_rounding_half_up() {
        // 10 minutes is 0.1666... hours
        assert_eq!(session_hours(t(9, 0), t(9, 10)).to_string(), "0.17");
        // 20 minutes is 0.3333... hours
        assert_eq!(session_hours(t(9, 0), t(9, 20)).to_string(), "0.33");
    }

    #[test]
    fn test_elapsed_hours_floors_negative_spans() {
        let earlier = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 6, 1, 14, 45, 0).unwrap();
        assert_eq!(elapsed_hours(earlier, later).to_string(), "4.75");
        assert_eq!(elapsed_hours(later, earlier).to_string(), "0.00");
    }

    #[test]
    fn test_elapsed_hours_across_days() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 6, 3, 1, 0, 0).unwrap();
        assert_eq!(elapsed_hours(start, end).to_string(), "27.00");
    }
}
