//! Five-field cron expression parsing and forward scanning. Fields are
//! minute, hour, day-of-month, month, day-of-week, with `*`, `,`, `-`,
//! `/` and the `@yearly`/etc. shortcuts. Day-of-week uses the standard
//! cron convention (0 = Sunday .. 6 = Saturday); this matters because
//! `chrono::Weekday` numbers Monday-first, so matching uses
//! `num_days_from_sunday()` rather than `num_days_from_monday()`.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use kos_core::Error;

#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    day_of_month: BTreeSet<u32>,
    month: BTreeSet<u32>,
    day_of_week: BTreeSet<u32>,
}

fn expand_shortcut(schedule: &str) -> &str {
    match schedule {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        other => other,
    }
}

impl CronSchedule {
    pub fn parse(schedule: &str) -> Result<Self, Error> {
        let expanded = expand_shortcut(schedule.trim());
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::Invalid(format!("invalid cron schedule: {schedule}")));
        }
        Ok(CronSchedule {
            minute: parse_field(fields[0], 0, 59)?,
            hour: parse_field(fields[1], 0, 23)?,
            day_of_month: parse_field(fields[2], 1, 31)?,
            month: parse_field(fields[3], 1, 12)?,
            day_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    /// Scans forward one minute at a time from `from`, per the design
    /// note that this cadence is only ever evaluated at most once a
    /// minute. Gives up after a year's worth of minutes.
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (from + Duration::minutes(1)).with_second(0).unwrap().with_nanosecond(0).unwrap();
        for _ in 0..525_600 {
            if self.matches(candidate) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }

    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.contains(&at.minute())
            && self.hour.contains(&at.hour())
            && self.day_of_month.contains(&at.day())
            && self.month.contains(&at.month())
            && self.day_of_week.contains(&at.weekday().num_days_from_sunday())
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>, Error> {
    let mut result = BTreeSet::new();
    for part in field.split(',') {
        if part == "*" {
            result.extend(min..=max);
            continue;
        }
        if let Some((base, step)) = part.split_once('/') {
            let step: u32 = step.parse().map_err(|_| Error::Invalid(format!("invalid cron step: {part}")))?;
            if step == 0 {
                return Err(Error::Invalid(format!("cron step cannot be zero: {part}")));
            }
            let (base_min, base_max) = if base == "*" {
                (min, max)
            } else if let Some((s, e)) = base.split_once('-') {
                (parse_num(s)?, parse_num(e)?)
            } else {
                let v = parse_num(base)?;
                (v, max)
            };
            let mut v = base_min;
            while v <= base_max {
                if v >= min && v <= max {
                    result.insert(v);
                }
                v += step;
            }
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start = parse_num(start)?;
            let end = parse_num(end)?;
            for v in start..=end {
                if v >= min && v <= max {
                    result.insert(v);
                }
            }
            continue;
        }
        let v = parse_num(part)?;
        if v < min || v > max {
            return Err(Error::Invalid(format!("cron field value {v} out of range [{min},{max}]")));
        }
        result.insert(v);
    }
    Ok(result)
}

fn parse_num(raw: &str) -> Result<u32, Error> {
    raw.trim().parse().map_err(|_| Error::Invalid(format!("invalid cron field value: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wildcard_matches_every_minute() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = schedule.next_execution_time(now).unwrap();
        assert_eq!(next, now + Duration::minutes(1));
    }

    #[test]
    fn hourly_shortcut_lands_on_the_hour() {
        let schedule = CronSchedule::parse("@hourly").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap();
        let next = schedule.next_execution_time(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn weekly_shortcut_lands_on_sunday() {
        let schedule = CronSchedule::parse("@weekly").unwrap();
        // 2026-01-01 is a Thursday.
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = schedule.next_execution_time(now).unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Sun);
    }

    #[test]
    fn step_syntax_selects_every_other_hour() {
        let field = parse_field("*/2", 0, 23).unwrap();
        assert!(field.contains(&0));
        assert!(!field.contains(&1));
        assert!(field.contains(&22));
    }

    #[test]
    fn range_and_list_combine() {
        let field = parse_field("1-3,7", 0, 23).unwrap();
        assert_eq!(field, BTreeSet::from([1, 2, 3, 7]));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * *").is_err());
    }
}
