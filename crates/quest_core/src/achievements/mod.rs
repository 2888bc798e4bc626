//! crates/quest_core/src/achievements/mod.rs
//!
//! The achievement catalog, the unlock workflow and the per-completion batch
//! re-check.

pub mod conditions;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{error, info};

use crate::calendar::Calendar;
use crate::domain::{Achievement, AchievementId, AchievementProgress, ExpLogEntry, ExpSource, UserId};
use crate::error::{EngineError, EngineResult};
use crate::ports::ProgressStore;

pub use conditions::Condition;

/// The seeded catalog. The initial migration inserts the same rows.
pub fn catalog() -> Vec<Achievement> {
    let entry = |id, title: &str, description: &str, max_progress, reward_xp, reward_gold| Achievement {
        achievement_id: id,
        title: title.to_string(),
        description: description.to_string(),
        max_progress,
        reward_xp,
        reward_gold,
    };
    vec![
        entry(1, "First Step", "Complete your first todo.", 1, 50, 10),
        entry(2, "Three in a Row", "Complete todos three days in a row.", 3, 100, 20),
        entry(3, "The Reward of Consistency", "Complete todos thirty days in a row.", 30, 1000, 200),
        entry(4, "Ruler of the Battlefield", "Complete 100 todos.", 100, 500, 100),
        entry(5, "Night Owl", "Complete a todo between midnight and 5 a.m.", 1, 50, 10),
        entry(6, "Todo Slayer", "Complete 20 todos in a single day.", 20, 300, 50),
        entry(7, "Master of Time", "Complete a todo in the morning and another in the afternoon of the same day.", 2, 100, 20),
        entry(8, "Monday Survivor", "Complete 3 todos on a Monday.", 3, 100, 20),
        entry(9, "Divine Focus", "Complete 30 todos in a single day.", 30, 500, 100),
        entry(10, "The Plan Was Perfect", "Create 3 or more todos today and complete none of them.", 3, 30, 0),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reward {
    pub xp: i32,
    pub gold: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked {
        progress: AchievementProgress,
        reward: Reward,
    },
    /// An unlock record already existed and is returned unchanged.
    AlreadyUnlocked(AchievementProgress),
    ConditionNotMet,
}

/// Catalog entry joined with one user's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementStatus {
    pub achievement: Achievement,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub progress: i32,
    pub unlocked_user_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockedAchievement {
    pub achievement: Achievement,
    pub progress: AchievementProgress,
}

/// Outcome of re-checking every achievement for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub unlocked: Vec<AchievementId>,
    pub already_unlocked: Vec<AchievementId>,
    pub not_met: Vec<AchievementId>,
    pub failed: Vec<(AchievementId, String)>,
}

/// Unlocks an achievement for a user if its condition holds, paying the
/// reward at most once.
///
/// The reward goes straight onto the character as a flat increment. Unlike
/// task completion it does not run level-up resolution; the next completion
/// normalizes the balance.
pub async fn unlock_achievement(
    store: &dyn ProgressStore,
    calendar: &Calendar,
    now: DateTime<Utc>,
    user_id: UserId,
    achievement_id: AchievementId,
) -> EngineResult<UnlockOutcome> {
    let achievement = store
        .get_achievement(achievement_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("Achievement {} not found", achievement_id)))?;

    let met = match Condition::from_id(achievement_id) {
        Some(condition) => condition.is_met(store, calendar, now, user_id).await?,
        None => false,
    };
    if !met {
        return Ok(UnlockOutcome::ConditionNotMet);
    }

    if let Some(existing) = store.get_achievement_progress(user_id, achievement_id).await? {
        return Ok(UnlockOutcome::AlreadyUnlocked(existing));
    }

    let progress = AchievementProgress {
        user_id,
        achievement_id,
        is_unlocked: true,
        progress: achievement.max_progress,
        unlocked_at: Some(now),
    };
    let reward = Reward {
        xp: achievement.reward_xp,
        gold: achievement.reward_gold,
    };

    let mut tx = store.begin().await?;
    if !tx.insert_achievement_progress(&progress).await? {
        // Lost a race with a concurrent unlock; theirs stands.
        drop(tx);
        let existing = store
            .get_achievement_progress(user_id, achievement_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Achievement {} progress", achievement_id)))?;
        return Ok(UnlockOutcome::AlreadyUnlocked(existing));
    }
    let character = tx
        .credit_character(user_id, i64::from(reward.xp), i64::from(reward.gold), now)
        .await?
        .ok_or(EngineError::CharacterNotFound { user_id })?;
    if reward.xp != 0 {
        tx.append_exp_log(&ExpLogEntry {
            user_id,
            character_id: character.character_id,
            source: ExpSource::Achievement(achievement_id),
            exp: i64::from(reward.xp),
            created_at: now,
        })
        .await?;
    }
    tx.commit().await?;

    info!(user_id, achievement_id, xp = reward.xp, gold = reward.gold, "Achievement unlocked");
    Ok(UnlockOutcome::Unlocked { progress, reward })
}

/// Re-checks all ten achievements for a user. A failure on one id is recorded
/// and does not stop the others.
pub async fn evaluate_all(
    store: &dyn ProgressStore,
    calendar: &Calendar,
    now: DateTime<Utc>,
    user_id: UserId,
) -> BatchReport {
    let mut report = BatchReport::default();
    for condition in Condition::ALL {
        let id = condition.id();
        match unlock_achievement(store, calendar, now, user_id, id).await {
            Ok(UnlockOutcome::Unlocked { .. }) => report.unlocked.push(id),
            Ok(UnlockOutcome::AlreadyUnlocked(_)) => report.already_unlocked.push(id),
            Ok(UnlockOutcome::ConditionNotMet) => report.not_met.push(id),
            Err(e) => {
                error!(user_id, achievement_id = id, error = %e, "Achievement evaluation failed");
                report.failed.push((id, e.to_string()));
            }
        }
    }
    report
}

/// The whole catalog with the user's unlock state and global unlock counts.
pub async fn all_achievements(
    store: &dyn ProgressStore,
    user_id: UserId,
) -> EngineResult<Vec<AchievementStatus>> {
    let achievements = store.list_achievements().await?;
    let mut progress: HashMap<AchievementId, AchievementProgress> = store
        .list_achievement_progress(user_id)
        .await?
        .into_iter()
        .map(|p| (p.achievement_id, p))
        .collect();
    let counts = store.unlocked_user_counts().await?;

    Ok(achievements
        .into_iter()
        .map(|achievement| {
            let mine = progress.remove(&achievement.achievement_id);
            let unlocked_user_count = counts.get(&achievement.achievement_id).copied().unwrap_or(0);
            AchievementStatus {
                is_unlocked: mine.as_ref().is_some_and(|p| p.is_unlocked),
                unlocked_at: mine.as_ref().and_then(|p| p.unlocked_at),
                progress: mine.map(|p| p.progress).unwrap_or(0),
                unlocked_user_count,
                achievement,
            }
        })
        .collect())
}

/// Achievements the user has unlocked, newest first.
pub async fn user_achievements(
    store: &dyn ProgressStore,
    user_id: UserId,
) -> EngineResult<Vec<UnlockedAchievement>> {
    let catalog: HashMap<AchievementId, Achievement> = store
        .list_achievements()
        .await?
        .into_iter()
        .map(|a| (a.achievement_id, a))
        .collect();
    let mut unlocked: Vec<UnlockedAchievement> = store
        .list_achievement_progress(user_id)
        .await?
        .into_iter()
        .filter(|p| p.is_unlocked)
        .filter_map(|progress| {
            let achievement = catalog.get(&progress.achievement_id)?.clone();
            Some(UnlockedAchievement {
                achievement,
                progress,
            })
        })
        .collect();
    unlocked.sort_by(|a, b| b.progress.unlocked_at.cmp(&a.progress.unlocked_at));
    Ok(unlocked)
}
