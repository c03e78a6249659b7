//! Calendar-field cron trigger with rollover resolution.
//!
//! Expressions use 5 fields (`min hour dom mon dow`, seconds fixed at 0) or
//! 6 fields with leading seconds. Each field supports `*`, lists, ranges,
//! steps (`*/n`, `a-b/n`) and month / weekday names. Resolution walks the
//! calendar fields coarse to fine with carry, never by scanning candidate
//! instants one by one.
//!
//! All field math happens in the trigger's timezone. DST rules follow the
//! house convention: local times inside a spring-forward gap resolve to the
//! first representable instant after the gap; ambiguous fall-back times take
//! the earliest mapping.

use std::collections::BTreeSet;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Upper bound on month/year rollovers per resolution. Generous enough to
/// cross any leap-year gap; hitting it means the constraint set is
/// unsatisfiable (e.g. Feb 30).
const MAX_MONTH_ROLLOVERS: u32 = 12 * 5;

/// Forward probes used to step over a DST gap (quarter-hour steps cover the
/// 30/45/60-minute gaps that exist in practice).
const MAX_GAP_PROBES: u32 = 8;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CronTrigger {
    pub expression: String,
    pub timezone: Tz,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    /// Inclusive year bounds, applied in the trigger's timezone.
    #[serde(default)]
    pub years: Option<(i32, i32)>,
    fields: CronFields,
}

impl CronTrigger {
    /// Parse a 5- or 6-field cron expression, evaluated in `timezone`.
    pub fn new(expression: &str, timezone: Tz) -> Result<Self> {
        let fields = CronFields::parse(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            timezone,
            start_at: None,
            end_at: None,
            years: None,
            fields,
        })
    }

    /// Parse an expression evaluated in UTC.
    pub fn utc(expression: &str) -> Result<Self> {
        Self::new(expression, chrono_tz::UTC)
    }

    /// Parse an expression with an IANA timezone name (e.g. "Europe/Paris").
    pub fn in_timezone(expression: &str, timezone: &str) -> Result<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))?;
        Self::new(expression, tz)
    }

    pub fn with_start(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    pub fn with_end(mut self, end_at: DateTime<Utc>) -> Self {
        self.end_at = Some(end_at);
        self
    }

    /// Restrict fires to `lo..=hi` (calendar years in the trigger's zone).
    pub fn with_years(mut self, lo: i32, hi: i32) -> Self {
        self.years = Some((lo, hi));
        self
    }

    /// Smallest instant `>= now` (and strictly after `previous`) whose
    /// local representation satisfies every field constraint.
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut lower = now;
        if let Some(start) = self.start_at {
            lower = lower.max(start);
        }
        if let Some(p) = previous {
            // Cron resolution is one second, so "strictly after previous"
            // is "at least previous + 1s".
            lower = lower.max(p + Duration::seconds(1));
        }

        let local = align_to_second(lower.with_timezone(&self.timezone).naive_local());
        let candidate = self.fields.next_after(local, self.years)?;
        let resolved = match self.timezone.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) => earliest,
            // Inside a spring-forward gap: the candidate resolves to the
            // first representable instant after the gap.
            LocalResult::None => resolve_gap(&self.timezone, candidate)?,
        };
        self.bounded(resolved.with_timezone(&Utc))
    }

    fn bounded(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.end_at {
            Some(end) if instant > end => None,
            _ => Some(instant),
        }
    }
}

/// Bump sub-second lower bounds to the next whole second.
fn align_to_second(t: NaiveDateTime) -> NaiveDateTime {
    if t.nanosecond() == 0 {
        t
    } else {
        t.with_nanosecond(0).unwrap_or(t) + Duration::seconds(1)
    }
}

/// Resolve a local time inside a spring-forward gap to the transition
/// instant (the first valid local time after the gap).
///
/// Probes forward in quarter-hour steps to escape the gap, then walks back
/// minute by minute to its boundary. Real-world gap boundaries are
/// minute-aligned, so the walk-back is exact.
fn resolve_gap(tz: &Tz, inside: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut probe = inside.with_second(0)?.with_nanosecond(0)?;
    for _ in 0..MAX_GAP_PROBES {
        probe += Duration::minutes(15);
        if matches!(tz.from_local_datetime(&probe), LocalResult::None) {
            continue;
        }
        let mut boundary = probe;
        loop {
            let back = boundary - Duration::minutes(1);
            if back <= inside || matches!(tz.from_local_datetime(&back), LocalResult::None) {
                break;
            }
            boundary = back;
        }
        tracing::debug!(%inside, %boundary, %tz, "local time falls in a DST gap, shifted forward");
        return match tz.from_local_datetime(&boundary) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => None,
        };
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Field constraint sets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CronFields {
    seconds: BTreeSet<u32>,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    /// Day of month, 1-31.
    days: BTreeSet<u32>,
    /// Month, 1-12.
    months: BTreeSet<u32>,
    /// Day of week, 0=Sunday .. 6=Saturday.
    weekdays: BTreeSet<u32>,
    /// Whether the source expression restricted dom / dow. When both are
    /// restricted a date qualifies if *either* matches (conventional cron).
    dom_restricted: bool,
    dow_restricted: bool,
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

impl CronFields {
    fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        let (sec_spec, rest) = match parts.len() {
            5 => ("0", &parts[..]),
            6 => (parts[0], &parts[1..]),
            n => {
                return Err(SchedulerError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {n}: {expression:?}"
                )))
            }
        };

        let seconds = parse_field(sec_spec, 0, 59, None)?;
        let minutes = parse_field(rest[0], 0, 59, None)?;
        let hours = parse_field(rest[1], 0, 23, None)?;
        let days = parse_field(rest[2], 1, 31, None)?;
        let months = parse_field(rest[3], 1, 12, Some(&MONTH_NAMES))?;
        let mut weekdays = parse_field(rest[4], 0, 7, Some(&DAY_NAMES))?;
        // 7 is an alias for Sunday.
        if weekdays.remove(&7) {
            weekdays.insert(0);
        }

        Ok(Self {
            seconds,
            minutes,
            hours,
            days,
            months,
            weekdays,
            dom_restricted: rest[2].trim() != "*",
            dow_restricted: rest[4].trim() != "*",
        })
    }

    /// First local datetime `>= lower` satisfying every field, or `None`
    /// within the rollover bound.
    fn next_after(
        &self,
        lower: NaiveDateTime,
        years: Option<(i32, i32)>,
    ) -> Option<NaiveDateTime> {
        let mut date = lower.date();
        // The time floor only applies while we are still on the lower
        // bound's date; any date rollover resets finer fields to minimum.
        let mut time_floor = Some(lower.time());

        let mut rollovers = 0u32;
        loop {
            if rollovers > MAX_MONTH_ROLLOVERS {
                return None;
            }

            if let Some((lo, hi)) = years {
                if date.year() > hi {
                    return None;
                }
                if date.year() < lo {
                    date = NaiveDate::from_ymd_opt(lo, 1, 1)?;
                    time_floor = None;
                }
            }

            if !self.months.contains(&date.month()) {
                date = self.advance_month(date)?;
                time_floor = None;
                rollovers += 1;
                continue;
            }

            match self.next_day_in_month(date) {
                Some(d) if d == date => {}
                Some(d) => {
                    date = d;
                    time_floor = None;
                }
                None => {
                    date = self.advance_month(first_of_next_month(date)?)?;
                    time_floor = None;
                    rollovers += 1;
                    continue;
                }
            }

            match self.next_time(time_floor) {
                Some(time) => return Some(date.and_time(time)),
                None => {
                    // Every valid time today is behind the floor: carry to
                    // the next day.
                    date = date.succ_opt()?;
                    time_floor = None;
                    if date.day() == 1 {
                        rollovers += 1;
                    }
                }
            }
        }
    }

    /// Smallest date `>= date` in the same month whose day qualifies.
    fn next_day_in_month(&self, date: NaiveDate) -> Option<NaiveDate> {
        let mut candidate = date;
        loop {
            if candidate.month() != date.month() {
                return None;
            }
            if self.day_qualifies(candidate) {
                return Some(candidate);
            }
            candidate = candidate.succ_opt()?;
        }
    }

    fn day_qualifies(&self, date: NaiveDate) -> bool {
        let dom = self.days.contains(&date.day());
        let dow = self
            .weekdays
            .contains(&date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            // Conventional cron: either constraint admits the date.
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First day of the next month whose month value is valid.
    fn advance_month(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self.months.range(date.month()..).next() {
            Some(&m) if m == date.month() => Some(date),
            Some(&m) => NaiveDate::from_ymd_opt(date.year(), m, 1),
            None => {
                let &m = self.months.iter().next()?;
                NaiveDate::from_ymd_opt(date.year().checked_add(1)?, m, 1)
            }
        }
    }

    /// Smallest valid (hour, minute, second) at or after `floor`; `None`
    /// means the day is exhausted. A `floor` of `None` yields the minimum.
    fn next_time(&self, floor: Option<NaiveTime>) -> Option<NaiveTime> {
        let (&min_minute, &min_second) = (self.minutes.iter().next()?, self.seconds.iter().next()?);
        let floor = match floor {
            None => {
                let &h = self.hours.iter().next()?;
                return NaiveTime::from_hms_opt(h, min_minute, min_second);
            }
            Some(f) => f,
        };

        for &h in self.hours.range(floor.hour()..) {
            if h > floor.hour() {
                return NaiveTime::from_hms_opt(h, min_minute, min_second);
            }
            // Same hour: roll the minute.
            for &m in self.minutes.range(floor.minute()..) {
                if m > floor.minute() {
                    return NaiveTime::from_hms_opt(h, m, min_second);
                }
                if let Some(&s) = self.seconds.range(floor.second()..).next() {
                    return NaiveTime::from_hms_opt(h, m, s);
                }
                // No second left in this minute; the next minute (if any)
                // restarts at the minimum second.
            }
            // Hour exhausted at the floor minute; retry with the next hour.
            if let Some(&h2) = self.hours.range(floor.hour() + 1..).next() {
                return NaiveTime::from_hms_opt(h2, min_minute, min_second);
            }
            return None;
        }
        None
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year().checked_add(1)?, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

/// Parse one cron field into its constraint set.
fn parse_field(
    spec: &str,
    min: u32,
    max: u32,
    names: Option<&[&str]>,
) -> Result<BTreeSet<u32>> {
    let spec = spec.trim();
    let mut set = BTreeSet::new();

    for part in spec.split(',') {
        let (range_spec, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| SchedulerError::InvalidCron(format!("bad step in {part:?}")))?;
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range_spec == "*" {
            (min, max)
        } else if let Some((a, b)) = range_spec.split_once('-') {
            (
                parse_value(a, min, max, names)?,
                parse_value(b, min, max, names)?,
            )
        } else {
            let v = parse_value(range_spec, min, max, names)?;
            // A bare value with a step means "from v to max, every step".
            if step > 1 { (v, max) } else { (v, v) }
        };

        if lo > hi {
            return Err(SchedulerError::InvalidCron(format!(
                "inverted range in {part:?}"
            )));
        }
        set.extend((lo..=hi).step_by(step as usize));
    }

    if set.is_empty() {
        return Err(SchedulerError::InvalidCron(format!("empty field {spec:?}")));
    }
    Ok(set)
}

fn parse_value(s: &str, min: u32, max: u32, names: Option<&[&str]>) -> Result<u32> {
    let s = s.trim();
    if let Some(names) = names {
        let lower = s.to_ascii_lowercase();
        if let Some(idx) = names.iter().position(|n| *n == lower) {
            // Named tables are zero-based for weekdays, one-based for months.
            return Ok(idx as u32 + min.min(1));
        }
    }
    let v: u32 = s
        .parse()
        .map_err(|_| SchedulerError::InvalidCron(format!("bad value {s:?}")))?;
    if v < min || v > max {
        return Err(SchedulerError::InvalidCron(format!(
            "value {v} outside {min}..={max}"
        )));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_field_expression_fires_on_whole_minutes() {
        let t = CronTrigger::utc("*/15 * * * *").unwrap();
        let next = t.next_fire_time(None, utc(2026, 6, 15, 10, 3, 20)).unwrap();
        assert_eq!(next, utc(2026, 6, 15, 10, 15, 0));
    }

    #[test]
    fn six_field_expression_honours_seconds() {
        let t = CronTrigger::utc("30 * * * * *").unwrap();
        let next = t.next_fire_time(None, utc(2026, 6, 15, 10, 3, 31)).unwrap();
        assert_eq!(next, utc(2026, 6, 15, 10, 4, 30));
    }

    #[test]
    fn exact_match_is_due() {
        let t = CronTrigger::utc("30 9 * * *").unwrap();
        let at = utc(2026, 6, 15, 9, 30, 0);
        assert_eq!(t.next_fire_time(None, at), Some(at));
    }

    #[test]
    fn hour_rollover_resets_minutes() {
        let t = CronTrigger::utc("10,40 9-17 * * *").unwrap();
        let next = t.next_fire_time(None, utc(2026, 6, 15, 9, 45, 0)).unwrap();
        assert_eq!(next, utc(2026, 6, 15, 10, 10, 0));
    }

    #[test]
    fn day_rollover_resets_time_to_minimum() {
        let t = CronTrigger::utc("30 9 * * *").unwrap();
        let next = t.next_fire_time(None, utc(2026, 6, 15, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 6, 16, 9, 30, 0));
    }

    #[test]
    fn month_rollover_with_carry_into_next_year() {
        let t = CronTrigger::utc("0 0 1 jan *").unwrap();
        let next = t.next_fire_time(None, utc(2026, 3, 10, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2027, 1, 1, 0, 0, 0));
    }

    #[test]
    fn dom_and_dow_combine_with_or_when_both_restricted() {
        // 13th of the month OR any Friday.
        let t = CronTrigger::utc("0 0 13 * fri").unwrap();
        // 2026-06-10 is a Wednesday; the next Friday is the 12th, before
        // the 13th (a Saturday).
        let next = t.next_fire_time(None, utc(2026, 6, 10, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 6, 12, 0, 0, 0));
        let after = t.next_fire_time(Some(next), next).unwrap();
        assert_eq!(next.weekday().num_days_from_sunday(), 5);
        assert_eq!(after, utc(2026, 6, 13, 0, 0, 0));
    }

    #[test]
    fn dow_alone_restricts_when_dom_is_wildcard() {
        let t = CronTrigger::utc("0 12 * * mon").unwrap();
        // 2026-06-15 is a Monday.
        let next = t.next_fire_time(None, utc(2026, 6, 13, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 6, 15, 12, 0, 0));
    }

    #[test]
    fn impossible_date_returns_none() {
        let t = CronTrigger::utc("0 0 30 feb *").unwrap();
        assert_eq!(t.next_fire_time(None, utc(2026, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn leap_day_found_across_years() {
        let t = CronTrigger::utc("0 0 29 feb *").unwrap();
        let next = t.next_fire_time(None, utc(2026, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn every_field_constraint_is_satisfied() {
        let t = CronTrigger::utc("15 10 2-8 */3 *").unwrap();
        let mut cursor = utc(2026, 1, 1, 0, 0, 0);
        let mut prev = None;
        for _ in 0..12 {
            let next = t.next_fire_time(prev, cursor).unwrap();
            assert_eq!(next.minute(), 15);
            assert_eq!(next.hour(), 10);
            assert!((2..=8).contains(&next.day()));
            // Months from "*/3" over 1..=12: 1, 4, 7, 10.
            assert!([1, 4, 7, 10].contains(&next.month()));
            if let Some(p) = prev {
                assert!(next > p, "iteration must strictly increase");
            }
            prev = Some(next);
            cursor = next;
        }
    }

    #[test]
    fn timezone_fields_are_local() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let t = CronTrigger::new("0 9 * * *", tz).unwrap();
        let next = t.next_fire_time(None, utc(2026, 6, 15, 1, 0, 0)).unwrap();
        // 09:00 JST is 00:00 UTC; 01:00 UTC is already past it, so the next
        // fire is tomorrow's.
        assert_eq!(next, utc(2026, 6, 16, 0, 0, 0));
    }

    #[test]
    fn dst_gap_resolves_forward() {
        let tz: Tz = "US/Eastern".parse().unwrap();
        // 02:30 local does not exist on 2026-03-08 (02:00 -> 03:00).
        let t = CronTrigger::new("30 2 8 3 *", tz).unwrap();
        let next = t
            .next_fire_time(None, utc(2026, 3, 8, 0, 0, 0))
            .expect("gap must resolve to a valid instant");
        // First representable local time after the gap is 03:00 EDT = 07:00 UTC.
        assert_eq!(next, utc(2026, 3, 8, 7, 0, 0));
    }

    #[test]
    fn dst_ambiguous_takes_earliest() {
        let tz: Tz = "US/Eastern".parse().unwrap();
        // 01:30 local happens twice on 2026-11-01.
        let t = CronTrigger::new("30 1 1 11 *", tz).unwrap();
        let next = t.next_fire_time(None, utc(2026, 11, 1, 0, 0, 0)).unwrap();
        // Earliest mapping is still EDT (UTC-4): 05:30 UTC.
        assert_eq!(next, utc(2026, 11, 1, 5, 30, 0));
    }

    #[test]
    fn start_and_end_bounds() {
        let t = CronTrigger::utc("0 * * * *")
            .unwrap()
            .with_start(utc(2026, 6, 15, 12, 0, 0))
            .with_end(utc(2026, 6, 15, 13, 0, 0));
        let first = t.next_fire_time(None, utc(2026, 6, 15, 0, 0, 0)).unwrap();
        assert_eq!(first, utc(2026, 6, 15, 12, 0, 0));
        let second = t.next_fire_time(Some(first), first).unwrap();
        assert_eq!(second, utc(2026, 6, 15, 13, 0, 0));
        assert_eq!(t.next_fire_time(Some(second), second), None);
    }

    #[test]
    fn year_bounds_restrict_and_exhaust() {
        let t = CronTrigger::utc("0 0 1 1 *").unwrap().with_years(2028, 2029);
        let first = t.next_fire_time(None, utc(2026, 5, 1, 0, 0, 0)).unwrap();
        assert_eq!(first, utc(2028, 1, 1, 0, 0, 0));
        let second = t.next_fire_time(Some(first), first).unwrap();
        assert_eq!(second, utc(2029, 1, 1, 0, 0, 0));
        assert_eq!(t.next_fire_time(Some(second), second), None);
    }

    #[test]
    fn named_timezone_constructor_validates() {
        assert!(CronTrigger::in_timezone("0 9 * * *", "Europe/Paris").is_ok());
        assert!(matches!(
            CronTrigger::in_timezone("0 9 * * *", "Mars/Olympus").unwrap_err(),
            SchedulerError::InvalidTimezone(_)
        ));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "* * *", "61 * * * *", "* * * * * * *", "a * * * *", "5-2 * * * *"] {
            assert!(CronTrigger::utc(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn serde_round_trip_preserves_behaviour() {
        let t = CronTrigger::new("0 9 * * mon-fri", "Europe/London".parse().unwrap()).unwrap();
        let json = serde_json::to_string(&t).unwrap();
        let back: CronTrigger = serde_json::from_str(&json).unwrap();
        let now = utc(2026, 6, 13, 0, 0, 0);
        assert_eq!(t.next_fire_time(None, now), back.next_fire_time(None, now));
    }
}
