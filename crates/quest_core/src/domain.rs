//! crates/quest_core/src/domain.rs
//!
//! Defines the pure, core data structures for the progression engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};

pub type UserId = i64;
pub type TaskId = i64;
pub type CharacterId = i64;
pub type AchievementId = i32;

/// The authenticated identity handed to every core operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: UserId,
    pub nickname: String,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub email: String,
    pub nickname: String,
    pub hashed_password: String,
}

/// Per-user streak state. Only the progression engine writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub current_streak: i32,
    pub longest_streak: i32,
}

/// A todo item owned by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub content: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// One-shot flag: experience for this task has been credited.
    pub exp_given: bool,
    pub exp_reward: i32,
}

/// Where a task sits in the completion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    CompletedRewarded,
    /// Reverted to incomplete by an edit after the reward was paid.
    ReopenedRewarded,
    /// Completed through an edit, never rewarded. Not reachable through
    /// `complete_task`.
    CompletedUnrewarded,
}

impl Task {
    pub fn state(&self) -> TaskState {
        match (self.completed, self.exp_given) {
            (false, false) => TaskState::Pending,
            (true, true) => TaskState::CompletedRewarded,
            (false, true) => TaskState::ReopenedRewarded,
            (true, false) => TaskState::CompletedUnrewarded,
        }
    }
}

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: UserId,
    pub content: String,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A partial edit of a task. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub content: Option<String>,
    pub completed: Option<bool>,
}

/// The gamified avatar, keyed by (user_id, character_name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    pub character_id: CharacterId,
    pub user_id: UserId,
    pub character_name: String,
    pub exp: i64,
    pub level: i32,
    pub gold: i64,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Reward Ledger
//=========================================================================================

/// What caused an experience ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpSource {
    Task(TaskId),
    Achievement(AchievementId),
}

/// A signed experience grant (negative on revocation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpLogEntry {
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub source: ExpSource,
    pub exp: i64,
    pub created_at: DateTime<Utc>,
}

/// A level change of a character, up or down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTransition {
    pub character_id: CharacterId,
    pub previous_level: i32,
    pub new_level: i32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Complete,
    Delete,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Complete => "COMPLETE",
            TaskAction::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLogEntry {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub action: TaskAction,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Achievements
//=========================================================================================

/// A static catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Achievement {
    pub achievement_id: AchievementId,
    pub title: String,
    pub description: String,
    pub max_progress: i32,
    pub reward_xp: i32,
    pub reward_gold: i32,
}

/// Per (user, achievement) unlock record. Never reset once unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementProgress {
    pub user_id: UserId,
    pub achievement_id: AchievementId,
    pub is_unlocked: bool,
    pub progress: i32,
    pub unlocked_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Ranking
//=========================================================================================

/// One denormalized leaderboard row. Derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingEntry {
    pub user_id: UserId,
    pub rank: i32,
    pub level: i32,
    pub total_exp: i64,
    pub nickname: Option<String>,
    pub calculated_at: DateTime<Utc>,
}

//=========================================================================================
// Events
//=========================================================================================

/// Published after a completion commits; drives the achievement re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    pub user_id: UserId,
    pub task_id: TaskId,
}
