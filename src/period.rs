//! Previous-period derivation for comparison metrics.
//!
//! Pure date arithmetic, no I/O. Given a requested range and "today" (the
//! viewer's local calendar date), derives the equivalent previous period and
//! a human-readable label for it. Range derivation and label generation both
//! dispatch on one [`RangeKind`] classification so they can never disagree.

use chrono::{Datelike, Duration, NaiveDate};

use crate::types::{first_of_month, first_of_prev_month, jan_first, last_of_month, DateRange};

/// The derived comparison period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousPeriod {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub label: String,
}

impl PreviousPeriod {
    /// The previous period as a plain range (no preset tag).
    pub fn range(&self) -> DateRange {
        DateRange {
            from: self.from,
            to: self.to,
            preset: None,
        }
    }
}

/// Which derivation rule a range matches. Checked in order; first match
/// wins. Later, more general rules must not pre-empt specific ones, so the
/// order here is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeKind {
    SingleDay,
    SevenDaysEndingYesterday,
    ThirtyDaysEndingYesterday,
    /// Starts on the 1st of the current month. Only the start boundary is
    /// checked: today always falls inside "this month", so the end is free
    /// to be partial. A custom range that coincidentally starts on the 1st
    /// also lands here.
    StartsOnCurrentMonth,
    FullPreviousMonth,
    /// Starts on Jan 1 of the current year. Start boundary only, same
    /// reasoning as `StartsOnCurrentMonth`.
    StartsOnCurrentYear,
    FullPreviousYear,
    Custom,
}

fn classify(range: &DateRange, today: NaiveDate) -> RangeKind {
    let yesterday = today - Duration::days(1);
    let prev_month_first = first_of_prev_month(today);

    if range.from == range.to {
        RangeKind::SingleDay
    } else if range.days() == 7 && range.to == yesterday {
        RangeKind::SevenDaysEndingYesterday
    } else if range.days() == 30 && range.to == yesterday {
        RangeKind::ThirtyDaysEndingYesterday
    } else if range.from == first_of_month(today) {
        RangeKind::StartsOnCurrentMonth
    } else if range.from == prev_month_first && range.to == last_of_month(prev_month_first) {
        RangeKind::FullPreviousMonth
    } else if range.from == jan_first(today.year()) {
        RangeKind::StartsOnCurrentYear
    } else if range.from == jan_first(today.year() - 1)
        && range.to == jan_first(today.year()) - Duration::days(1)
    {
        RangeKind::FullPreviousYear
    } else {
        RangeKind::Custom
    }
}

/// Derive the comparison period for `range`, relative to `today`.
pub fn resolve_previous_period(range: &DateRange, today: NaiveDate) -> PreviousPeriod {
    let kind = classify(range, today);
    let n = range.days();

    let (from, to) = match kind {
        RangeKind::SingleDay => {
            let day = range.from - Duration::days(1);
            (day, day)
        }
        RangeKind::SevenDaysEndingYesterday => {
            (range.from - Duration::days(7), range.to - Duration::days(7))
        }
        RangeKind::ThirtyDaysEndingYesterday => (
            range.from - Duration::days(30),
            range.to - Duration::days(30),
        ),
        RangeKind::StartsOnCurrentMonth => {
            let from = first_of_prev_month(today);
            (from, from + Duration::days(n - 1))
        }
        RangeKind::FullPreviousMonth => {
            let from = first_of_prev_month(range.from);
            (from, last_of_month(from))
        }
        RangeKind::StartsOnCurrentYear => {
            let from = jan_first(today.year() - 1);
            (from, from + Duration::days(n - 1))
        }
        RangeKind::FullPreviousYear => {
            let year = today.year() - 2;
            (jan_first(year), jan_first(year + 1) - Duration::days(1))
        }
        RangeKind::Custom => {
            let to = range.from - Duration::days(1);
            (to - Duration::days(n - 1), to)
        }
    };

    let label = label_for(kind, from, to, n, today);
    PreviousPeriod { from, to, label }
}

/// Human label for the derived period. Takes the already-classified kind so
/// the wording always matches the range that was actually derived.
fn label_for(kind: RangeKind, from: NaiveDate, to: NaiveDate, n: i64, today: NaiveDate) -> String {
    let span = format_span(from, to, today);
    match kind {
        RangeKind::SingleDay => format!("Previous day ({})", format_day(from, today)),
        RangeKind::SevenDaysEndingYesterday => format!("Previous 7 days ({span})"),
        RangeKind::ThirtyDaysEndingYesterday => format!("Previous 30 days ({span})"),
        RangeKind::StartsOnCurrentMonth => format!("Same period last month ({span})"),
        RangeKind::FullPreviousMonth => format!("Previous month ({span})"),
        RangeKind::StartsOnCurrentYear => format!("Same period last year ({span})"),
        RangeKind::FullPreviousYear => format!("Previous year ({span})"),
        RangeKind::Custom => format!("Previous {n} days ({span})"),
    }
}

/// "Mar 14 - Mar 20", with the year appended when it differs from today's.
fn format_span(from: NaiveDate, to: NaiveDate, today: NaiveDate) -> String {
    if to.year() == today.year() {
        format!("{} - {}", format_month_day(from), format_month_day(to))
    } else {
        format!(
            "{} - {}, {}",
            format_month_day(from),
            format_month_day(to),
            to.year()
        )
    }
}

fn format_day(day: NaiveDate, today: NaiveDate) -> String {
    if day.year() == today.year() {
        format_month_day(day)
    } else {
        format!("{}, {}", format_month_day(day), day.year())
    }
}

fn format_month_day(day: NaiveDate) -> String {
    format!("{} {}", day.format("%b"), day.day())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn range(from: NaiveDate, to: NaiveDate) -> DateRange {
        DateRange::new(from, to).unwrap()
    }

    #[test]
    fn test_single_day_shifts_back_one_day() {
        let today = d(2024, 3, 28);
        for day in [d(2024, 3, 15), d(2024, 1, 1), d(2024, 12, 31)] {
            let prev = resolve_previous_period(&DateRange::single_day(day), today);
            assert_eq!(prev.from, day - Duration::days(1));
            assert_eq!(prev.to, prev.from);
        }
    }

    #[test]
    fn test_single_day_leap_year_boundary() {
        // 2024-03-01 -> 2024-02-29
        let prev =
            resolve_previous_period(&DateRange::single_day(d(2024, 3, 1)), d(2024, 3, 28));
        assert_eq!((prev.from, prev.to), (d(2024, 2, 29), d(2024, 2, 29)));
    }

    #[test]
    fn test_seven_days_ending_yesterday() {
        // 2024-03-21..2024-03-27 ends yesterday relative to 03-28
        let today = d(2024, 3, 28);
        let prev = resolve_previous_period(&range(d(2024, 3, 21), d(2024, 3, 27)), today);
        assert_eq!((prev.from, prev.to), (d(2024, 3, 14), d(2024, 3, 20)));
        // Non-overlapping
        assert!(prev.to < d(2024, 3, 21));
        assert_eq!(prev.label, "Previous 7 days (Mar 14 - Mar 20)");
    }

    #[test]
    fn test_thirty_days_ending_yesterday() {
        let today = d(2024, 3, 31);
        let current = range(d(2024, 3, 1), d(2024, 3, 30));
        assert_eq!(current.days(), 30);
        let prev = resolve_previous_period(&current, today);
        assert_eq!((prev.from, prev.to), (d(2024, 1, 31), d(2024, 2, 29)));
        assert!(prev.label.starts_with("Previous 30 days"));
    }

    #[test]
    fn test_starts_on_current_month_shifts_to_previous_month() {
        // Mar 1-15 viewed mid-March compares against Feb 1-15
        let today = d(2024, 3, 20);
        let prev = resolve_previous_period(&range(d(2024, 3, 1), d(2024, 3, 15)), today);
        assert_eq!((prev.from, prev.to), (d(2024, 2, 1), d(2024, 2, 15)));
        assert_eq!(prev.label, "Same period last month (Feb 1 - Feb 15)");
    }

    #[test]
    fn test_full_previous_month_shifts_to_month_before() {
        // All of February 2024 viewed from March 2024
        let today = d(2024, 3, 10);
        let prev = resolve_previous_period(&range(d(2024, 2, 1), d(2024, 2, 29)), today);
        assert_eq!((prev.from, prev.to), (d(2024, 1, 1), d(2024, 1, 31)));
        assert_eq!(prev.label, "Previous month (Jan 1 - Jan 31)");
    }

    #[test]
    fn test_starts_on_current_year_same_day_count() {
        let today = d(2024, 3, 29);
        let current = range(d(2024, 1, 1), d(2024, 3, 28)); // 88 days
        let prev = resolve_previous_period(&current, today);
        assert_eq!(prev.from, d(2023, 1, 1));
        // Same day-count, not same calendar end: 2024 is a leap year
        assert_eq!((prev.to - prev.from).num_days() + 1, 88);
        assert_eq!(prev.to, d(2023, 3, 29));
        assert!(prev.label.starts_with("Same period last year"));
        assert!(prev.label.contains("2023"));
    }

    #[test]
    fn test_full_previous_year() {
        let today = d(2024, 6, 1);
        let prev = resolve_previous_period(&range(d(2023, 1, 1), d(2023, 12, 31)), today);
        assert_eq!((prev.from, prev.to), (d(2022, 1, 1), d(2022, 12, 31)));
        assert_eq!(prev.label, "Previous year (Jan 1 - Dec 31, 2022)");
    }

    #[test]
    fn test_custom_range_shifts_back_by_day_count() {
        let today = d(2024, 6, 1);
        for (from, to) in [
            (d(2024, 3, 5), d(2024, 3, 9)),
            (d(2024, 4, 10), d(2024, 4, 10 + 12)),
            (d(2023, 11, 20), d(2023, 12, 4)),
        ] {
            let current = range(from, to);
            let n = current.days();
            let prev = resolve_previous_period(&current, today);
            assert_eq!(prev.to, from - Duration::days(1), "to touches current.from - 1");
            assert_eq!((prev.to - prev.from).num_days() + 1, n, "same day count");
        }
    }

    #[test]
    fn test_custom_label_names_day_count() {
        let today = d(2024, 6, 1);
        let prev = resolve_previous_period(&range(d(2024, 3, 5), d(2024, 3, 9)), today);
        assert_eq!(prev.label, "Previous 5 days (Feb 29 - Mar 4)");
    }

    #[test]
    fn test_single_day_on_the_first_wins_over_month_rule() {
        // Rule order: a single-day range on the 1st of the current month is
        // still a single day, not a month-start range.
        let today = d(2024, 3, 20);
        let prev = resolve_previous_period(&DateRange::single_day(d(2024, 3, 1)), today);
        assert_eq!((prev.from, prev.to), (d(2024, 2, 29), d(2024, 2, 29)));
    }

    #[test]
    fn test_month_start_heuristic_catches_coincidental_ranges() {
        // A custom range that happens to start on the 1st of the current
        // month gets month-shifted comparison data.
        let today = d(2024, 3, 20);
        let prev = resolve_previous_period(&range(d(2024, 3, 1), d(2024, 3, 10)), today);
        assert_eq!((prev.from, prev.to), (d(2024, 2, 1), d(2024, 2, 10)));
    }

    #[test]
    fn test_seven_days_not_ending_yesterday_is_custom() {
        // Seven days ending three days ago falls through to the custom rule
        let today = d(2024, 3, 28);
        let prev = resolve_previous_period(&range(d(2024, 3, 18), d(2024, 3, 24)), today);
        assert_eq!((prev.from, prev.to), (d(2024, 3, 11), d(2024, 3, 17)));
        assert!(prev.label.starts_with("Previous 7 days"));
    }

    #[test]
    fn test_label_and_range_always_agree() {
        // The label must quote the endpoints of the range that was derived
        let today = d(2024, 3, 28);
        let cases = [
            DateRange::single_day(d(2024, 3, 15)),
            range(d(2024, 3, 21), d(2024, 3, 27)),
            range(d(2024, 3, 1), d(2024, 3, 15)),
            range(d(2024, 2, 1), d(2024, 2, 29)),
            range(d(2024, 3, 5), d(2024, 3, 9)),
        ];
        for current in cases {
            let prev = resolve_previous_period(&current, today);
            let from_text = format!("{} {}", prev.from.format("%b"), prev.from.day());
            assert!(
                prev.label.contains(&from_text),
                "label {:?} should mention {}",
                prev.label,
                from_text
            );
        }
    }

    #[test]
    fn test_previous_period_range_accessor() {
        let prev = resolve_previous_period(
            &range(d(2024, 3, 21), d(2024, 3, 27)),
            d(2024, 3, 28),
        );
        let r = prev.range();
        assert_eq!((r.from, r.to), (prev.from, prev.to));
        assert!(r.preset.is_none());
    }
}
