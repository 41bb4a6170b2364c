//! Time periods with IANA timezone and DST awareness.
//!
//! A period's identity is its local start date plus the granularity; the
//! nominal duration is 24 h for daily, 168 h for weekly, 720 h for monthly.
//! Daily periods record their *actual* local length (23/25 h on DST
//! transition days) together with a transition marker.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// DST transition type for a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstTransition {
    SpringForward,
    FallBack,
}

/// Summary granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

/// A time interval `[start, end]` in a named timezone.
///
/// `start` and `end` are zone-local wall-clock times; use [`start_utc`]
/// / [`end_utc`] for instants.
///
/// [`start_utc`]: PeriodInfo::start_utc
/// [`end_utc`]: PeriodInfo::end_utc
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodInfo {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub timezone: String,
    #[serde(default = "default_duration_hours")]
    pub duration_hours: i64,
    #[serde(default)]
    pub dst_transition: Option<DstTransition>,
}

fn default_duration_hours() -> i64 {
    24
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap()
}

impl PeriodInfo {
    /// One local calendar day. The duration is the real local day length,
    /// so a spring-forward day is 23 h and a fall-back day 25 h, with the
    /// matching transition marker.
    pub fn daily(date: NaiveDate, timezone: &str) -> Result<Self> {
        let tz = parse_tz(timezone)?;
        let hours = local_day_hours(tz, date);
        let dst_transition = match hours {
            23 => Some(DstTransition::SpringForward),
            25 => Some(DstTransition::FallBack),
            _ => None,
        };
        Ok(Self {
            start: date.and_time(NaiveTime::MIN),
            end: date.and_time(end_of_day()),
            timezone: timezone.to_string(),
            duration_hours: hours,
            dst_transition,
        })
    }

    /// A week (possibly partial at either end of a planned range).
    pub fn weekly(start: NaiveDate, end: NaiveDate, timezone: &str) -> Result<Self> {
        parse_tz(timezone)?;
        Ok(Self {
            start: start.and_time(NaiveTime::MIN),
            end: end.and_time(end_of_day()),
            timezone: timezone.to_string(),
            duration_hours: 168,
            dst_transition: None,
        })
    }

    /// A calendar month (possibly clamped by a planned range).
    pub fn monthly(start: NaiveDate, end: NaiveDate, timezone: &str) -> Result<Self> {
        parse_tz(timezone)?;
        Ok(Self {
            start: start.and_time(NaiveTime::MIN),
            end: end.and_time(end_of_day()),
            timezone: timezone.to_string(),
            duration_hours: 720,
            dst_transition: None,
        })
    }

    /// An arbitrary range; the duration is the wall-clock span in hours.
    pub fn custom(start: NaiveDateTime, end: NaiveDateTime, timezone: &str) -> Result<Self> {
        parse_tz(timezone)?;
        let duration_hours = (end - start).num_hours().max(0);
        Ok(Self {
            start,
            end,
            timezone: timezone.to_string(),
            duration_hours,
            dst_transition: None,
        })
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.date()
    }

    pub fn start_utc(&self) -> Result<DateTime<Utc>> {
        let tz = parse_tz(&self.timezone)?;
        Ok(resolve_local(tz, self.start))
    }

    pub fn end_utc(&self) -> Result<DateTime<Utc>> {
        let tz = parse_tz(&self.timezone)?;
        Ok(resolve_local(tz, self.end))
    }

    /// Filename stem for this period's artifact pair.
    ///
    /// `YYYY-MM-DD_daily` (≤24 h), `YYYY-Www_weekly` (≤168 h, ISO week),
    /// `YYYY-MM_monthly` (≤744 h), otherwise `YYYY-MM-DD_to_YYYY-MM-DD`.
    pub fn filename_stem(&self) -> String {
        let start = self.start_date();
        if self.duration_hours <= 24 {
            format!("{}_daily", start.format("%Y-%m-%d"))
        } else if self.duration_hours <= 168 {
            let iso = start.iso_week();
            format!("{}-W{:02}_weekly", iso.year(), iso.week())
        } else if self.duration_hours <= 744 {
            format!("{}_monthly", start.format("%Y-%m"))
        } else {
            format!(
                "{}_to_{}",
                start.format("%Y-%m-%d"),
                self.end_date().format("%Y-%m-%d")
            )
        }
    }
}

fn parse_tz(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| CoreError::UnknownTimezone(timezone.to_string()))
}

/// Map a local wall-clock time to UTC. Ambiguous times (fall-back hour)
/// resolve to the earlier instant; skipped times (spring-forward hour)
/// resolve to the first valid instant an hour later.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = local + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    dt.with_timezone(&Utc)
                }
                LocalResult::None => Utc.from_utc_datetime(&local),
            }
        }
    }
}

/// Real length of a local calendar day in hours (23, 24 or 25).
fn local_day_hours(tz: Tz, date: NaiveDate) -> i64 {
    let midnight = resolve_local(tz, date.and_time(NaiveTime::MIN));
    let next = resolve_local(tz, (date + Duration::days(1)).and_time(NaiveTime::MIN));
    (next - midnight).num_hours()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn plain_day_is_24_hours() {
        let period = PeriodInfo::daily(date(2026, 2, 10), "America/New_York").unwrap();
        assert_eq!(period.duration_hours, 24);
        assert_eq!(period.dst_transition, None);
    }

    #[test]
    fn spring_forward_day_is_23_hours() {
        // US DST starts 2026-03-08 in America/New_York.
        let period = PeriodInfo::daily(date(2026, 3, 8), "America/New_York").unwrap();
        assert_eq!(period.duration_hours, 23);
        assert_eq!(period.dst_transition, Some(DstTransition::SpringForward));
    }

    #[test]
    fn fall_back_day_is_25_hours() {
        // US DST ends 2026-11-01 in America/New_York.
        let period = PeriodInfo::daily(date(2026, 11, 1), "America/New_York").unwrap();
        assert_eq!(period.duration_hours, 25);
        assert_eq!(period.dst_transition, Some(DstTransition::FallBack));
    }

    #[test]
    fn utc_conversion_applies_offset() {
        let period = PeriodInfo::daily(date(2026, 2, 10), "America/New_York").unwrap();
        let start = period.start_utc().unwrap();
        // EST is UTC-5 in February.
        assert_eq!(start.to_rfc3339(), "2026-02-10T05:00:00+00:00");
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(PeriodInfo::daily(date(2026, 1, 1), "Mars/Olympus").is_err());
    }

    #[test]
    fn daily_filename_stem() {
        let period = PeriodInfo::daily(date(2026, 2, 11), "UTC").unwrap();
        assert_eq!(period.filename_stem(), "2026-02-11_daily");
    }

    #[test]
    fn weekly_filename_uses_iso_week() {
        let period = PeriodInfo::weekly(date(2026, 1, 5), date(2026, 1, 11), "UTC").unwrap();
        assert_eq!(period.filename_stem(), "2026-W02_weekly");
    }

    #[test]
    fn monthly_filename_stem() {
        let period = PeriodInfo::monthly(date(2026, 2, 1), date(2026, 2, 28), "UTC").unwrap();
        assert_eq!(period.filename_stem(), "2026-02_monthly");
    }

    #[test]
    fn custom_range_filename_stem() {
        let start = date(2026, 1, 1).and_time(NaiveTime::MIN);
        let end = date(2026, 3, 1).and_hms_opt(23, 59, 59).unwrap();
        let period = PeriodInfo::custom(start, end, "UTC").unwrap();
        assert_eq!(period.filename_stem(), "2026-01-01_to_2026-03-01");
    }

    #[test]
    fn period_round_trips_through_json() {
        let period = PeriodInfo::daily(date(2026, 3, 8), "America/New_York").unwrap();
        let json = serde_json::to_string(&period).unwrap();
        let back: PeriodInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, period);
    }
}
