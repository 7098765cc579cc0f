//! Pure availability functions over a snapshot of stored periods.
//!
//! All ranges are closed: a period occupies both its first and its last day,
//! so a stay ending on the 10th conflicts with one starting on the 10th.

use tracing::warn;

use crate::model::*;
use crate::observability::MALFORMED_PERIODS_SKIPPED_TOTAL;

use super::EngineError;

/// True iff the closed intervals `[a_start, a_end]` and `[b_start, b_end]`
/// share at least one day.
pub fn intervals_overlap(a_start: Day, a_end: Day, b_start: Day, b_end: Day) -> Result<bool, EngineError> {
    let a = DateRange::new(a_start, a_end)?;
    let b = DateRange::new(b_start, b_end)?;
    Ok(a.overlaps(&b))
}

/// Date range of a period if it blocks the calendar. Malformed periods are
/// skipped with a warning rather than failing the whole computation.
fn blocking_range<P: StoredPeriod>(period: &P) -> Option<DateRange> {
    if !period.status().is_blocking() {
        return None;
    }
    match period.date_range() {
        Ok(range) => Some(range),
        Err(e) => {
            warn!("skipping stored period: {e}");
            metrics::counter!(MALFORMED_PERIODS_SKIPPED_TOTAL).increment(1);
            None
        }
    }
}

/// First blocking period overlapping the proposal, in slice order.
pub fn find_conflict<P: StoredPeriod>(existing: &[P], start: Day, end: Day) -> Result<Option<&P>, EngineError> {
    let proposed = DateRange::new(start, end)?;
    Ok(existing
        .iter()
        .find(|p| blocking_range(*p).is_some_and(|r| r.overlaps(&proposed))))
}

/// A proposal is admissible iff no pending or confirmed period overlaps it.
pub fn is_proposal_admissible<P: StoredPeriod>(existing: &[P], start: Day, end: Day) -> Result<bool, EngineError> {
    Ok(find_conflict(existing, start, end)?.is_none())
}

/// Blocking periods as date ranges, in input order. Not merged or
/// de-duplicated. Cloning the iterator restarts the computation.
pub fn compute_blocked_intervals<P: StoredPeriod>(existing: &[P]) -> impl Iterator<Item = DateRange> + Clone + '_ {
    existing.iter().filter_map(blocking_range)
}

pub fn is_date_blocked<P: StoredPeriod>(date: Day, existing: &[P]) -> bool {
    compute_blocked_intervals(existing).any(|r| r.contains_day(date))
}

/// Sort and merge closed ranges. Ranges that overlap or sit on consecutive
/// days become one.
pub fn merge_blocked(ranges: impl IntoIterator<Item = DateRange>) -> Vec<DateRange> {
    let mut sorted: Vec<DateRange> = ranges.into_iter().collect();
    sorted.sort_by_key(|r| r.start);

    let mut merged: Vec<DateRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        if let Some(last) = merged.last_mut()
            && last.end.succ_opt().map_or(true, |next| range.start <= next)
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Days of `window` not covered by any of `blocked`.
/// `blocked` must be sorted and merged (see [`merge_blocked`]).
pub fn free_ranges(window: DateRange, blocked: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut cursor = Some(window.start);

    for b in blocked {
        let Some(start) = cursor else { break };
        if b.end < start {
            continue;
        }
        if b.start > window.end {
            break;
        }
        if b.start > start
            && let Some(before) = b.start.pred_opt()
        {
            result.push(DateRange { start, end: before });
        }
        cursor = b.end.succ_opt();
    }

    if let Some(start) = cursor
        && start <= window.end
    {
        result.push(DateRange { start, end: window.end });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationStatus::*;

    fn day(s: &str) -> Day {
        parse_day(s).unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(day(a), day(b)).unwrap()
    }

    fn period(a: &str, b: &str, status: ReservationStatus) -> BookablePeriod {
        BookablePeriod::new(a, b, status)
    }

    // ── intervals_overlap ────────────────────────────────

    #[test]
    fn overlap_is_symmetric() {
        let cases = [
            ("2024-01-01", "2024-01-05", "2024-01-03", "2024-01-09"),
            ("2024-01-01", "2024-01-05", "2024-01-06", "2024-01-09"),
            ("2024-01-01", "2024-01-31", "2024-01-10", "2024-01-12"),
            ("2024-01-05", "2024-01-05", "2024-01-05", "2024-01-05"),
        ];
        for (a1, a2, b1, b2) in cases {
            let ab = intervals_overlap(day(a1), day(a2), day(b1), day(b2)).unwrap();
            let ba = intervals_overlap(day(b1), day(b2), day(a1), day(a2)).unwrap();
            assert_eq!(ab, ba, "{a1}..{a2} vs {b1}..{b2}");
        }
    }

    #[test]
    fn touching_boundaries_overlap() {
        assert!(intervals_overlap(day("2024-01-01"), day("2024-01-10"), day("2024-01-10"), day("2024-01-20")).unwrap());
    }

    #[test]
    fn disjoint_ranges_do_not_overlap() {
        assert!(!intervals_overlap(day("2024-01-01"), day("2024-01-09"), day("2024-01-10"), day("2024-01-20")).unwrap());
    }

    #[test]
    fn overlap_rejects_reversed_input() {
        let err = intervals_overlap(day("2024-01-10"), day("2024-01-01"), day("2024-01-01"), day("2024-01-02"));
        assert!(matches!(err, Err(EngineError::InvalidRange(_))));
        let err = intervals_overlap(day("2024-01-01"), day("2024-01-02"), day("2024-01-10"), day("2024-01-01"));
        assert!(matches!(err, Err(EngineError::InvalidRange(_))));
    }

    // ── admissibility ────────────────────────────────────

    #[test]
    fn cancelled_never_blocks() {
        let existing = vec![period("2024-06-01", "2024-06-30", Cancelled)];
        assert!(is_proposal_admissible(&existing, day("2024-06-10"), day("2024-06-12")).unwrap());
        assert!(!is_date_blocked(day("2024-06-10"), &existing));
    }

    #[test]
    fn pending_blocks_like_confirmed() {
        for status in [Pending, Confirmed] {
            let existing = vec![period("2024-06-01", "2024-06-05", status)];
            assert!(!is_proposal_admissible(&existing, day("2024-06-05"), day("2024-06-08")).unwrap());
        }
    }

    #[test]
    fn empty_calendar_is_admissible() {
        let existing: Vec<BookablePeriod> = Vec::new();
        assert!(is_proposal_admissible(&existing, day("2024-06-01"), day("2024-06-01")).unwrap());
    }

    #[test]
    fn admissibility_is_order_insensitive() {
        let mut existing = vec![
            period("2024-06-20", "2024-06-25", Confirmed),
            period("2024-06-01", "2024-06-05", Pending),
            period("2024-06-10", "2024-06-12", Cancelled),
        ];
        let forward = is_proposal_admissible(&existing, day("2024-06-06"), day("2024-06-19")).unwrap();
        existing.reverse();
        let backward = is_proposal_admissible(&existing, day("2024-06-06"), day("2024-06-19")).unwrap();
        assert!(forward);
        assert_eq!(forward, backward);
    }

    #[test]
    fn reversed_proposal_rejected() {
        let existing = vec![period("2024-06-01", "2024-06-05", Pending)];
        let err = is_proposal_admissible(&existing, day("2024-03-10"), day("2024-03-01"));
        assert!(matches!(err, Err(EngineError::InvalidRange(_))));
    }

    #[test]
    fn malformed_record_skipped_for_admission() {
        let existing = vec![
            period("garbage", "2024-06-05", Confirmed),
            period("2024-06-20", "2024-06-22", Confirmed),
        ];
        assert!(is_proposal_admissible(&existing, day("2024-06-01"), day("2024-06-10")).unwrap());
        assert!(!is_proposal_admissible(&existing, day("2024-06-21"), day("2024-06-21")).unwrap());
    }

    #[test]
    fn find_conflict_names_the_period() {
        let existing = vec![
            period("2024-06-01", "2024-06-05", Cancelled),
            period("2024-06-03", "2024-06-04", Confirmed),
        ];
        let hit = find_conflict(&existing, day("2024-06-04"), day("2024-06-06")).unwrap();
        assert_eq!(hit, Some(&existing[1]));
    }

    // ── blocked intervals ───────────────────────────────

    #[test]
    fn blocked_intervals_keep_input_order_and_skip_non_blocking() {
        let existing = vec![
            period("2024-06-10", "2024-06-12", Pending),
            period("2024-06-01", "2024-06-03", Cancelled),
            period("2024-06-01", "2024-06-05", Confirmed),
        ];
        let blocked: Vec<_> = compute_blocked_intervals(&existing).collect();
        assert_eq!(blocked, vec![range("2024-06-10", "2024-06-12"), range("2024-06-01", "2024-06-05")]);
    }

    #[test]
    fn blocked_intervals_are_idempotent() {
        let existing = vec![
            period("2024-06-01", "2024-06-05", Confirmed),
            period("2024-06-03", "2024-06-07", Pending),
        ];
        let iter = compute_blocked_intervals(&existing);
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        let third: Vec<_> = compute_blocked_intervals(&existing).collect();
        assert_eq!(first, second);
        assert_eq!(first, third);
        // Overlapping periods are not merged.
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn malformed_record_skipped_for_blocked_intervals() {
        let existing = vec![
            period("2024-06-01", "2024-13-40", Confirmed),
            period("2024-06-10", "2024-06-12", Pending),
        ];
        let blocked: Vec<_> = compute_blocked_intervals(&existing).collect();
        assert_eq!(blocked, vec![range("2024-06-10", "2024-06-12")]);
    }

    #[test]
    fn date_blocked_bounds_are_inclusive() {
        let existing = vec![period("2024-06-01", "2024-06-05", Confirmed)];
        assert!(is_date_blocked(day("2024-06-01"), &existing));
        assert!(is_date_blocked(day("2024-06-05"), &existing));
        assert!(!is_date_blocked(day("2024-05-31"), &existing));
        assert!(!is_date_blocked(day("2024-06-06"), &existing));
    }

    // ── end to end ──────────────────────────────────────

    #[test]
    fn june_turnover_day_conflicts() {
        let existing = vec![period("2024-06-01", "2024-06-05", Confirmed)];
        assert!(!is_proposal_admissible(&existing, day("2024-06-05"), day("2024-06-08")).unwrap());
        assert!(is_proposal_admissible(&existing, day("2024-06-06"), day("2024-06-08")).unwrap());
    }

    #[test]
    fn june_blocked_dates_for_calendar() {
        let existing = vec![
            period("2024-06-01", "2024-06-05", Confirmed),
            period("2024-06-10", "2024-06-12", Pending),
            period("2024-06-15", "2024-06-20", Cancelled),
        ];
        let blocked: Vec<_> = compute_blocked_intervals(&existing).collect();
        assert_eq!(blocked, vec![range("2024-06-01", "2024-06-05"), range("2024-06-10", "2024-06-12")]);
        assert!(!is_date_blocked(day("2024-06-16"), &existing));
        assert!(is_date_blocked(day("2024-06-11"), &existing));
    }

    #[test]
    fn june_gap_before_cancelled_block_is_admissible() {
        let existing = vec![
            period("2024-06-01", "2024-06-10", Confirmed),
            period("2024-06-15", "2024-06-20", Cancelled),
        ];
        assert!(is_proposal_admissible(&existing, day("2024-06-11"), day("2024-06-14")).unwrap());
        assert!(!is_proposal_admissible(&existing, day("2024-06-05"), day("2024-06-12")).unwrap());
    }

    #[test]
    fn february_cancelled_period_does_not_block() {
        let existing = vec![period("2024-02-01", "2024-02-10", Cancelled)];
        assert!(is_proposal_admissible(&existing, day("2024-02-03"), day("2024-02-05")).unwrap());
    }

    // ── merge / free ranges ─────────────────────────────

    #[test]
    fn merge_overlapping_and_adjacent() {
        let merged = merge_blocked(vec![
            range("2024-06-10", "2024-06-12"),
            range("2024-06-01", "2024-06-05"),
            range("2024-06-04", "2024-06-06"),
            range("2024-06-07", "2024-06-08"),
        ]);
        assert_eq!(merged, vec![range("2024-06-01", "2024-06-08"), range("2024-06-10", "2024-06-12")]);
    }

    #[test]
    fn merge_contained_range() {
        let merged = merge_blocked(vec![range("2024-06-01", "2024-06-30"), range("2024-06-05", "2024-06-06")]);
        assert_eq!(merged, vec![range("2024-06-01", "2024-06-30")]);
    }

    #[test]
    fn free_ranges_empty_calendar() {
        let window = range("2024-06-01", "2024-06-30");
        assert_eq!(free_ranges(window, &[]), vec![window]);
    }

    #[test]
    fn free_ranges_punch_holes() {
        let window = range("2024-06-01", "2024-06-30");
        let blocked = vec![range("2024-06-05", "2024-06-07"), range("2024-06-20", "2024-06-21")];
        assert_eq!(
            free_ranges(window, &blocked),
            vec![
                range("2024-06-01", "2024-06-04"),
                range("2024-06-08", "2024-06-19"),
                range("2024-06-22", "2024-06-30"),
            ]
        );
    }

    #[test]
    fn free_ranges_blocked_edges() {
        let window = range("2024-06-01", "2024-06-30");
        let blocked = vec![range("2024-05-20", "2024-06-01"), range("2024-06-30", "2024-07-10")];
        assert_eq!(free_ranges(window, &blocked), vec![range("2024-06-02", "2024-06-29")]);
    }

    #[test]
    fn free_ranges_fully_blocked() {
        let window = range("2024-06-10", "2024-06-12");
        let blocked = vec![range("2024-06-01", "2024-06-30")];
        assert!(free_ranges(window, &blocked).is_empty());
    }

    #[test]
    fn free_ranges_ignore_outside_blocks() {
        let window = range("2024-06-10", "2024-06-12");
        let blocked = vec![range("2024-06-01", "2024-06-02"), range("2024-07-01", "2024-07-02")];
        assert_eq!(free_ranges(window, &blocked), vec![window]);
    }
}
