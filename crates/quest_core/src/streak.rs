//! crates/quest_core/src/streak.rs
//!
//! Daily completion streaks, recomputed from the full completion history.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;

use crate::calendar::Calendar;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Streak {
    pub longest: i32,
    pub current: i32,
}

/// Computes streaks from completion instants as of `now`.
///
/// Each local day with at least one completion counts once. Days after today
/// are ignored. `current` is the run of consecutive days ending today (0 when
/// today has no completion); `longest` is the longest run anywhere in the history.
pub fn compute_streak(completions: &[DateTime<Utc>], calendar: &Calendar, now: DateTime<Utc>) -> Streak {
    let today = calendar.local_date(now);
    let days: BTreeSet<NaiveDate> = completions
        .iter()
        .map(|at| calendar.local_date(*at))
        .filter(|day| *day <= today)
        .collect();

    let mut current = 0;
    let mut expected = today;
    while days.contains(&expected) {
        current += 1;
        expected -= Duration::days(1);
    }

    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for day in &days {
        run = match previous {
            Some(prev) if *day - prev == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(*day);
    }

    Streak { longest, current }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2024-05-20T10:00:00Z".parse().unwrap()
    }

    fn days_ago(n: i64) -> DateTime<Utc> {
        now() - Duration::days(n)
    }

    #[test]
    fn empty_history_has_no_streak() {
        assert_eq!(compute_streak(&[], &Calendar::utc(), now()), Streak::default());
    }

    #[test]
    fn gap_ends_current_run() {
        let history = [days_ago(0), days_ago(1), days_ago(2), days_ago(5)];
        let streak = compute_streak(&history, &Calendar::utc(), now());
        assert_eq!(streak, Streak { longest: 3, current: 3 });
    }

    #[test]
    fn multiple_completions_per_day_count_once() {
        let history = [
            days_ago(0),
            days_ago(0) - Duration::hours(3),
            days_ago(1),
            days_ago(1) + Duration::minutes(5),
        ];
        let streak = compute_streak(&history, &Calendar::utc(), now());
        assert_eq!(streak, Streak { longest: 2, current: 2 });
    }

    #[test]
    fn longest_run_can_be_in_the_past() {
        let mut history = vec![days_ago(0)];
        history.extend((10..15).map(days_ago));
        let streak = compute_streak(&history, &Calendar::utc(), now());
        assert_eq!(streak, Streak { longest: 5, current: 1 });
    }

    #[test]
    fn no_completion_today_means_no_current_streak() {
        let history = [days_ago(1), days_ago(2)];
        let streak = compute_streak(&history, &Calendar::utc(), now());
        assert_eq!(streak, Streak { longest: 2, current: 0 });
    }

    #[test]
    fn future_completions_are_ignored() {
        let history = [days_ago(0), now() + Duration::days(1), now() + Duration::days(2)];
        let streak = compute_streak(&history, &Calendar::utc(), now());
        assert_eq!(streak, Streak { longest: 1, current: 1 });
    }

    #[test]
    fn recomputation_is_order_independent() {
        let mut history = vec![days_ago(3), days_ago(0), days_ago(2), days_ago(1)];
        let first = compute_streak(&history, &Calendar::utc(), now());
        history.reverse();
        assert_eq!(compute_streak(&history, &Calendar::utc(), now()), first);
        assert_eq!(first, Streak { longest: 4, current: 4 });
    }
}
