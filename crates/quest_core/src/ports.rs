//! crates/quest_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the progression engine.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of a specific store, clock, or message transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::domain::{
    Achievement, AchievementId, AchievementProgress, Character, CharacterId, CompletionEvent,
    ExpLogEntry, LevelTransition, NewTask, Profile, RankingEntry, Task, TaskId, TaskLogEntry,
    User, UserCredentials, UserId,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., the database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A field-level change applied to a task row outside the reward path.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub content: Option<String>,
    /// `Some(Some(t))` marks the task completed at `t`, `Some(None)` reopens it.
    pub completion: Option<Option<DateTime<Utc>>>,
    pub updated_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Store Ports (Traits)
//=========================================================================================

/// Reads and single-statement writes against the relational store, plus the
/// entry point for multi-statement transactions.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Opens a transaction. Dropping the handle without `commit` rolls it back.
    async fn begin(&self) -> PortResult<Box<dyn StoreTx>>;

    // --- Users & Profiles ---
    async fn get_user(&self, user_id: UserId) -> PortResult<User>;

    async fn get_profile(&self, user_id: UserId) -> PortResult<Option<Profile>>;

    async fn get_or_create_profile(&self, user_id: UserId) -> PortResult<Profile>;

    // --- Tasks ---
    async fn insert_task(&self, task: NewTask) -> PortResult<Task>;

    async fn get_task(&self, task_id: TaskId) -> PortResult<Option<Task>>;

    async fn patch_task(&self, task_id: TaskId, patch: &TaskPatch) -> PortResult<Task>;

    /// Tasks whose `due_at` lies in `[start, end]`.
    async fn list_tasks_due_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Task>>;

    /// Tasks whose `created_at` lies in `[start, end)`.
    async fn list_tasks_created_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Task>>;

    /// Completed tasks with `completed_at >= since`.
    async fn count_completions_since(&self, user_id: UserId, since: DateTime<Utc>)
        -> PortResult<i64>;

    async fn count_completed(&self, user_id: UserId) -> PortResult<i64>;

    /// Completed tasks with `completed_at` in `[start, end)`.
    async fn count_completed_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<i64>;

    async fn completion_times(&self, user_id: UserId) -> PortResult<Vec<DateTime<Utc>>>;

    // --- Characters ---
    async fn get_character_for_user(&self, user_id: UserId) -> PortResult<Option<Character>>;

    /// Newest first.
    async fn list_characters(&self) -> PortResult<Vec<Character>>;

    /// Ordered by level desc, exp desc, character_id asc.
    async fn list_characters_by_standing(&self) -> PortResult<Vec<Character>>;

    async fn list_level_requirements(&self) -> PortResult<Vec<(i32, i64)>>;

    // --- Ledger ---
    /// Newest first.
    async fn list_exp_log(&self, user_id: UserId) -> PortResult<Vec<ExpLogEntry>>;

    // --- Achievements ---
    async fn list_achievements(&self) -> PortResult<Vec<Achievement>>;

    async fn get_achievement(&self, achievement_id: AchievementId)
        -> PortResult<Option<Achievement>>;

    async fn get_achievement_progress(
        &self,
        user_id: UserId,
        achievement_id: AchievementId,
    ) -> PortResult<Option<AchievementProgress>>;

    async fn list_achievement_progress(&self, user_id: UserId)
        -> PortResult<Vec<AchievementProgress>>;

    /// Number of distinct users that unlocked each achievement.
    async fn unlocked_user_counts(&self) -> PortResult<HashMap<AchievementId, i64>>;

    // --- Ranking ---
    async fn get_ranking_entry(&self, user_id: UserId) -> PortResult<Option<RankingEntry>>;

    async fn upsert_ranking_entry(&self, entry: &RankingEntry) -> PortResult<()>;

    /// Ordered by rank.
    async fn list_ranking(&self, limit: i64) -> PortResult<Vec<RankingEntry>>;
}

/// One open transaction. Every mutation the engine performs for a single
/// logical operation goes through the same `StoreTx`.
#[async_trait]
pub trait StoreTx: Send {
    /// Reads a task and holds its row lock until the transaction ends.
    async fn lock_task(&mut self, task_id: TaskId) -> PortResult<Option<Task>>;

    /// Marks the task completed at `at`. With `reward`, also sets
    /// `exp_given` and `exp_reward`.
    async fn complete_task(
        &mut self,
        task_id: TaskId,
        at: DateTime<Utc>,
        reward: Option<i32>,
    ) -> PortResult<Task>;

    async fn delete_task(&mut self, task_id: TaskId) -> PortResult<()>;

    async fn get_user(&mut self, user_id: UserId) -> PortResult<User>;

    async fn rename_user(&mut self, user_id: UserId, nickname: &str) -> PortResult<()>;

    async fn completion_times(&mut self, user_id: UserId) -> PortResult<Vec<DateTime<Utc>>>;

    async fn save_streak(&mut self, profile: &Profile) -> PortResult<()>;

    /// Creates the character with `delta` exp if absent, else adds `delta`
    /// as an atomic increment. Returns the row after the write.
    async fn add_character_exp(
        &mut self,
        user_id: UserId,
        character_name: &str,
        delta: i64,
        at: DateTime<Utc>,
    ) -> PortResult<Character>;

    async fn lock_character(
        &mut self,
        user_id: UserId,
        character_name: &str,
    ) -> PortResult<Option<Character>>;

    async fn set_character_progress(
        &mut self,
        character_id: CharacterId,
        exp: i64,
        level: i32,
        at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Adds exp and gold to the user's character as atomic deltas.
    /// `None` when the user has no character.
    async fn credit_character(
        &mut self,
        user_id: UserId,
        exp: i64,
        gold: i64,
        at: DateTime<Utc>,
    ) -> PortResult<Option<Character>>;

    /// Inserts the row unless one exists for the pair. Returns whether it inserted.
    async fn insert_achievement_progress(
        &mut self,
        progress: &AchievementProgress,
    ) -> PortResult<bool>;

    async fn append_exp_log(&mut self, entry: &ExpLogEntry) -> PortResult<()>;

    async fn append_level_transition(&mut self, transition: &LevelTransition) -> PortResult<()>;

    async fn append_task_log(&mut self, entry: &TaskLogEntry) -> PortResult<()>;

    async fn commit(self: Box<Self>) -> PortResult<()>;
}

/// Credential and session storage for the identity collaborator.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        nickname: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves a live session to its user.
    async fn validate_auth_session(&self, session_id: &str, now: DateTime<Utc>)
        -> PortResult<User>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}

//=========================================================================================
// Clock and Event Ports
//=========================================================================================

/// The source of "now" for every time-dependent rule.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Receives completion events once their transaction has committed.
pub trait CompletionEventSink: Send + Sync {
    fn publish(&self, event: CompletionEvent);
}
