//! crates/quest_core/src/levels.rs
//!
//! The level table and the pure level-up / level-down resolution over it.

use std::collections::BTreeMap;

/// Immutable mapping: level -> experience required to advance to the next level.
/// A level with no entry is the maximum level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    required: BTreeMap<i32, i64>,
}

/// Result of resolving a balance against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub exp: i64,
    pub level: i32,
    /// `(previous_level, new_level)` for each step taken, in order.
    pub steps: Vec<(i32, i32)>,
}

impl Resolution {
    pub fn changed_level(&self) -> bool {
        !self.steps.is_empty()
    }
}

impl LevelTable {
    /// Builds a table from `(level, required_exp)` rows. Rows with a
    /// non-positive requirement are skipped since they would never terminate.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (i32, i64)>,
    {
        let required = rows.into_iter().filter(|(_, req)| *req > 0).collect();
        Self { required }
    }

    /// The table seeded by the initial migration: level `n` needs `100 * n`,
    /// up to level 99.
    pub fn standard() -> Self {
        Self::from_rows((1..99).map(|level| (level, 100 * i64::from(level))))
    }

    pub fn required_exp(&self, level: i32) -> Option<i64> {
        self.required.get(&level).copied()
    }

    /// `(level, required_exp)` rows in level order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.required.iter().map(|(level, req)| (*level, *req))
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Applies level-ups until the balance no longer covers the current
    /// requirement or the table has no entry for the level.
    pub fn resolve_up(&self, mut exp: i64, mut level: i32) -> Resolution {
        let mut steps = Vec::new();
        while let Some(required) = self.required_exp(level) {
            if exp < required {
                break;
            }
            exp -= required;
            steps.push((level, level + 1));
            level += 1;
        }
        Resolution { exp, level, steps }
    }

    /// Walks levels down while the balance is negative, adding back the
    /// previous level's requirement each step. Stops at level 1 and clamps
    /// any remaining deficit to 0.
    pub fn resolve_down(&self, mut exp: i64, mut level: i32) -> Resolution {
        let mut steps = Vec::new();
        while exp < 0 && level > 1 {
            let Some(previous) = self.required_exp(level - 1) else {
                break;
            };
            exp += previous;
            steps.push((level, level - 1));
            level -= 1;
        }
        Resolution {
            exp: exp.max(0),
            level,
            steps,
        }
    }

    /// Requirement for the current level, 0 at max level.
    pub fn next_level_exp(&self, level: i32) -> i64 {
        self.required_exp(level).unwrap_or(0)
    }
}

/// Asset shown for a character at the given level.
pub fn level_image_url(level: i32) -> &'static str {
    match level {
        4..=10 => "/assets/tree1.png",
        11..=15 => "/assets/tree2.png",
        16..=20 => "/assets/tree3.png",
        21..=30 => "/assets/tree4.png",
        31..=40 => "/assets/tree5.png",
        41..=50 => "/assets/tree6.png",
        51..=i32::MAX => "/assets/tree7.png",
        _ => "/assets/tree0.png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> LevelTable {
        LevelTable::from_rows([(1, 100), (2, 200), (3, 300)])
    }

    #[test]
    fn single_level_up_keeps_remainder() {
        let r = small_table().resolve_up(130, 1);
        assert_eq!((r.exp, r.level), (30, 2));
        assert_eq!(r.steps, vec![(1, 2)]);
    }

    #[test]
    fn large_grant_jumps_several_levels() {
        let r = small_table().resolve_up(650, 1);
        assert_eq!((r.exp, r.level), (50, 4));
        assert_eq!(r.steps.len(), 3);
    }

    #[test]
    fn max_level_retains_excess() {
        let r = small_table().resolve_up(10_000, 1);
        assert_eq!(r.level, 4);
        assert_eq!(r.exp, 10_000 - 600);
        assert!(small_table().required_exp(r.level).is_none());
    }

    #[test]
    fn resolution_is_a_fixed_point() {
        let table = LevelTable::standard();
        for (exp, level) in [(0, 1), (99, 1), (100, 1), (5_000, 3), (1_000_000, 1), (250, 98)] {
            let once = table.resolve_up(exp, level);
            match table.required_exp(once.level) {
                Some(required) => assert!(once.exp < required),
                None => assert!(once.level >= 99),
            }
            let twice = table.resolve_up(once.exp, once.level);
            assert_eq!((twice.exp, twice.level), (once.exp, once.level));
            assert!(twice.steps.is_empty());
        }
    }

    #[test]
    fn level_down_borrows_previous_requirement() {
        // Level 2 with 30 exp, lose 100: -70 + 100 (level 1 requirement) = 30 at level 1.
        let r = small_table().resolve_down(30 - 100, 2);
        assert_eq!((r.exp, r.level), (30, 1));
        assert_eq!(r.steps, vec![(2, 1)]);
    }

    #[test]
    fn level_down_clamps_at_floor() {
        let r = small_table().resolve_down(-500, 2);
        assert_eq!((r.exp, r.level), (0, 1));
    }

    #[test]
    fn non_negative_balance_does_not_level_down() {
        let r = small_table().resolve_down(0, 3);
        assert_eq!((r.exp, r.level), (0, 3));
        assert!(!r.changed_level());
    }

    #[test]
    fn image_bands() {
        assert_eq!(level_image_url(1), "/assets/tree0.png");
        assert_eq!(level_image_url(10), "/assets/tree1.png");
        assert_eq!(level_image_url(50), "/assets/tree6.png");
        assert_eq!(level_image_url(120), "/assets/tree7.png");
        assert_eq!(level_image_url(0), "/assets/tree0.png");
    }
}
