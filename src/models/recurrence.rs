//! # Recurrence Patterns
//!
//! Value object describing how a recurring task repeats. Patterns are stored
//! as opaque strings on the task row, validated at creation time, and
//! re-parsed by the recurring task processor on each scan.
//!
//! ## Wire format
//!
//! - `daily`
//! - `weekly:mon,wed,fri` (subset of `mon,tue,wed,thu,fri,sat,sun`)
//! - `monthly:15` (day of month 1-31, clamped to the month's last day)
//! - `every:3d` (fixed interval in days, anchored at the parent's due date)

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use std::fmt;

use crate::error::{PipelineError, Result};

/// Parsed recurrence pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecurrencePattern {
    Daily,
    Weekly { weekdays: Vec<Weekday> },
    Monthly { day: u32 },
    Custom { interval_days: u32 },
}

impl RecurrencePattern {
    /// Parse the opaque string representation stored on a task row.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "daily" {
            return Ok(Self::Daily);
        }
        if let Some(days) = raw.strip_prefix("weekly:") {
            let mut weekdays = Vec::new();
            for token in days.split(',') {
                let weekday = parse_weekday(token.trim())?;
                if !weekdays.contains(&weekday) {
                    weekdays.push(weekday);
                }
            }
            if weekdays.is_empty() {
                return Err(PipelineError::validation(
                    "weekly pattern requires at least one weekday",
                ));
            }
            weekdays.sort_by_key(|w| w.num_days_from_monday());
            return Ok(Self::Weekly { weekdays });
        }
        if let Some(day) = raw.strip_prefix("monthly:") {
            let day: u32 = day
                .parse()
                .map_err(|_| PipelineError::validation(format!("invalid day of month: {day}")))?;
            if !(1..=31).contains(&day) {
                return Err(PipelineError::validation(format!(
                    "day of month out of range: {day}"
                )));
            }
            return Ok(Self::Monthly { day });
        }
        if let Some(interval) = raw.strip_prefix("every:") {
            let interval = interval.strip_suffix('d').ok_or_else(|| {
                PipelineError::validation(format!("custom interval must end in 'd': {interval}"))
            })?;
            let interval_days: u32 = interval.parse().map_err(|_| {
                PipelineError::validation(format!("invalid interval: {interval}"))
            })?;
            if interval_days == 0 {
                return Err(PipelineError::validation("interval must be at least one day"));
            }
            return Ok(Self::Custom { interval_days });
        }
        Err(PipelineError::validation(format!(
            "unrecognized recurrence pattern: {raw}"
        )))
    }

    /// The occurrence date for the current scheduling unit, if `today` falls
    /// on one. `anchor` is the series start (the parent task's due date);
    /// dates before the anchor never produce occurrences.
    pub fn occurrence_for(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<NaiveDate> {
        let today = now.date_naive();
        let start = anchor.date_naive();
        if today < start {
            return None;
        }
        match self {
            Self::Daily => Some(today),
            Self::Weekly { weekdays } => weekdays.contains(&today.weekday()).then_some(today),
            Self::Monthly { day } => {
                let last = last_day_of_month(today.year(), today.month());
                let scheduled = (*day).min(last);
                (today.day() == scheduled).then_some(today)
            }
            Self::Custom { interval_days } => {
                let elapsed = (today - start).num_days();
                (elapsed % i64::from(*interval_days) == 0).then_some(today)
            }
        }
    }

    /// The first occurrence date strictly after `after`. Bounded scan; every
    /// pattern recurs at least once per 31 days plus the custom interval.
    pub fn next_occurrence(&self, anchor: DateTime<Utc>, after: NaiveDate) -> NaiveDate {
        let horizon = match self {
            Self::Custom { interval_days } => i64::from(*interval_days) + 31,
            _ => 366,
        };
        let start = anchor.date_naive();
        let mut candidate = after.max(start - Duration::days(1));
        for _ in 0..=horizon {
            candidate += Duration::days(1);
            let probe = DateTime::<Utc>::from_naive_utc_and_offset(
                candidate.and_hms_opt(0, 0, 0).unwrap_or_default(),
                Utc,
            );
            if self.occurrence_for(anchor, probe) == Some(candidate) {
                return candidate;
            }
        }
        // Unreachable for valid patterns; fall back to the day after `after`.
        after + Duration::days(1)
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Weekly { weekdays } => {
                let days: Vec<&str> = weekdays.iter().map(|w| weekday_token(*w)).collect();
                write!(f, "weekly:{}", days.join(","))
            }
            Self::Monthly { day } => write!(f, "monthly:{day}"),
            Self::Custom { interval_days } => write!(f, "every:{interval_days}d"),
        }
    }
}

fn parse_weekday(token: &str) -> Result<Weekday> {
    match token {
        "mon" => Ok(Weekday::Mon),
        "tue" => Ok(Weekday::Tue),
        "wed" => Ok(Weekday::Wed),
        "thu" => Ok(Weekday::Thu),
        "fri" => Ok(Weekday::Fri),
        "sat" => Ok(Weekday::Sat),
        "sun" => Ok(Weekday::Sun),
        other => Err(PipelineError::validation(format!("invalid weekday: {other}"))),
    }
}

fn weekday_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match NaiveDate::from_ymd_opt(next_year, next_month, 1) {
        Some(first_of_next) => (first_of_next - Duration::days(1)).day(),
        // Month is always in 1..=12 here; 28 is the safe floor if not.
        None => 28,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_daily() {
        assert_eq!(RecurrencePattern::parse("daily").unwrap(), RecurrencePattern::Daily);
    }

    #[test]
    fn test_parse_weekly_sorted_and_deduped() {
        let pattern = RecurrencePattern::parse("weekly:fri,mon,fri").unwrap();
        assert_eq!(
            pattern,
            RecurrencePattern::Weekly {
                weekdays: vec![Weekday::Mon, Weekday::Fri]
            }
        );
        assert_eq!(pattern.to_string(), "weekly:mon,fri");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RecurrencePattern::parse("fortnightly").is_err());
        assert!(RecurrencePattern::parse("weekly:").is_err());
        assert!(RecurrencePattern::parse("monthly:0").is_err());
        assert!(RecurrencePattern::parse("monthly:32").is_err());
        assert!(RecurrencePattern::parse("every:0d").is_err());
        assert!(RecurrencePattern::parse("every:3w").is_err());
    }

    #[test]
    fn test_daily_occurrence_starts_at_anchor() {
        let pattern = RecurrencePattern::Daily;
        let anchor = utc(2026, 1, 22, 9);

        assert_eq!(pattern.occurrence_for(anchor, utc(2026, 1, 21, 12)), None);
        assert_eq!(
            pattern.occurrence_for(anchor, utc(2026, 1, 22, 0)),
            Some(NaiveDate::from_ymd_opt(2026, 1, 22).unwrap())
        );
        assert_eq!(
            pattern.occurrence_for(anchor, utc(2026, 1, 23, 23)),
            Some(NaiveDate::from_ymd_opt(2026, 1, 23).unwrap())
        );
    }

    #[test]
    fn test_weekly_occurrence_matches_weekday() {
        let pattern = RecurrencePattern::parse("weekly:thu").unwrap();
        let anchor = utc(2026, 1, 1, 9);

        // 2026-01-22 is a Thursday, 2026-01-23 a Friday.
        assert!(pattern.occurrence_for(anchor, utc(2026, 1, 22, 12)).is_some());
        assert!(pattern.occurrence_for(anchor, utc(2026, 1, 23, 12)).is_none());
    }

    #[test]
    fn test_monthly_clamps_to_short_months() {
        let pattern = RecurrencePattern::parse("monthly:31").unwrap();
        let anchor = utc(2026, 1, 1, 9);

        // April has 30 days; the 30th stands in for the 31st.
        assert!(pattern.occurrence_for(anchor, utc(2026, 4, 30, 12)).is_some());
        assert!(pattern.occurrence_for(anchor, utc(2026, 4, 29, 12)).is_none());
        assert!(pattern.occurrence_for(anchor, utc(2026, 1, 31, 12)).is_some());
    }

    #[test]
    fn test_custom_interval_anchored_at_due_date() {
        let pattern = RecurrencePattern::parse("every:3d").unwrap();
        let anchor = utc(2026, 1, 10, 9);

        assert!(pattern.occurrence_for(anchor, utc(2026, 1, 10, 12)).is_some());
        assert!(pattern.occurrence_for(anchor, utc(2026, 1, 11, 12)).is_none());
        assert!(pattern.occurrence_for(anchor, utc(2026, 1, 12, 12)).is_none());
        assert!(pattern.occurrence_for(anchor, utc(2026, 1, 13, 12)).is_some());
    }

    #[test]
    fn test_next_occurrence_daily() {
        let pattern = RecurrencePattern::Daily;
        let anchor = utc(2026, 1, 22, 9);
        let next = pattern.next_occurrence(anchor, NaiveDate::from_ymd_opt(2026, 1, 22).unwrap());
        assert_eq!(next, NaiveDate::from_ymd_opt(2026, 1, 23).unwrap());
    }

    #[test]
    fn test_next_occurrence_weekly_skips_to_weekday() {
        let pattern = RecurrencePattern::parse("weekly:mon").unwrap();
        let anchor = utc(2026, 1, 1, 9);
        // 2026-01-22 is a Thursday; the next Monday is 2026-01-26.
        let next = pattern.next_occurrence(anchor, NaiveDate::from_ymd_opt(2026, 1, 22).unwrap());
        assert_eq!(next, NaiveDate::from_ymd_opt(2026, 1, 26).unwrap());
    }

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(last_day_of_month(2026, 2), 28);
        assert_eq!(last_day_of_month(2028, 2), 29);
        assert_eq!(last_day_of_month(2026, 12), 31);
    }
}
