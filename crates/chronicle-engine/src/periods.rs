//! Period expansion for a planned date range.

use chrono::{Datelike, Duration, NaiveDate};

use chronicle_core::Granularity;

/// Expand `[start, end]` (inclusive) into ordered `(start, end)` period
/// pairs.
///
/// Daily yields one pair per date. Weekly periods end on the nearest
/// ISO-week Sunday (or `end`), so the first week may be partial.
/// Monthly periods run to the last day of their calendar month (or
/// `end`).
pub fn expand_periods(
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
) -> Vec<(NaiveDate, NaiveDate)> {
    let mut periods = Vec::new();
    let mut current = start;

    while current <= end {
        match granularity {
            Granularity::Daily => {
                periods.push((current, current));
                current += Duration::days(1);
            }
            Granularity::Weekly => {
                let days_until_sunday = 6 - current.weekday().num_days_from_monday() as i64;
                let period_end = (current + Duration::days(days_until_sunday)).min(end);
                periods.push((current, period_end));
                current = period_end + Duration::days(1);
            }
            Granularity::Monthly => {
                let period_end = end_of_month(current).min(end);
                periods.push((current, period_end));
                current = period_end.max(end_of_month(current)) + Duration::days(1);
            }
        }
    }
    periods
}

fn end_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // First of next month always exists.
    NaiveDate::from_ymd_opt(year, month, 1).unwrap() - Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn daily_is_one_period_per_date() {
        let periods = expand_periods(date(2026, 2, 10), date(2026, 2, 12), Granularity::Daily);
        assert_eq!(
            periods,
            vec![
                (date(2026, 2, 10), date(2026, 2, 10)),
                (date(2026, 2, 11), date(2026, 2, 11)),
                (date(2026, 2, 12), date(2026, 2, 12)),
            ]
        );
    }

    #[test]
    fn weekly_from_wednesday_ends_first_period_on_sunday() {
        // 2026-02-11 is a Wednesday; 2026-02-15 the following Sunday.
        let periods = expand_periods(date(2026, 2, 11), date(2026, 2, 28), Granularity::Weekly);
        assert_eq!(periods[0], (date(2026, 2, 11), date(2026, 2, 15)));
        // Subsequent periods run Monday → Sunday.
        assert_eq!(periods[1], (date(2026, 2, 16), date(2026, 2, 22)));
        // Final period clamps to the range end.
        assert_eq!(periods[2], (date(2026, 2, 23), date(2026, 2, 28)));
    }

    #[test]
    fn weekly_from_monday_is_full_weeks() {
        let periods = expand_periods(date(2026, 2, 2), date(2026, 2, 15), Granularity::Weekly);
        assert_eq!(
            periods,
            vec![
                (date(2026, 2, 2), date(2026, 2, 8)),
                (date(2026, 2, 9), date(2026, 2, 15)),
            ]
        );
    }

    #[test]
    fn monthly_runs_to_end_of_month() {
        let periods = expand_periods(date(2026, 1, 15), date(2026, 3, 10), Granularity::Monthly);
        assert_eq!(
            periods,
            vec![
                (date(2026, 1, 15), date(2026, 1, 31)),
                (date(2026, 2, 1), date(2026, 2, 28)),
                (date(2026, 3, 1), date(2026, 3, 10)),
            ]
        );
    }

    #[test]
    fn monthly_handles_december_rollover() {
        let periods = expand_periods(date(2025, 12, 1), date(2026, 1, 31), Granularity::Monthly);
        assert_eq!(
            periods,
            vec![
                (date(2025, 12, 1), date(2025, 12, 31)),
                (date(2026, 1, 1), date(2026, 1, 31)),
            ]
        );
    }

    #[test]
    fn empty_range_when_start_after_end() {
        assert!(expand_periods(date(2026, 2, 2), date(2026, 2, 1), Granularity::Daily).is_empty());
    }
}
