//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ProgressStore`, `StoreTx` and `AccountStore` ports from the `core` crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.
//!
//! Row locks (`FOR UPDATE`) close the read-then-write races on tasks and
//! characters; experience increments are applied as `exp = exp + $n` deltas.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quest_core::domain::{
    Achievement, AchievementId, AchievementProgress, Character, CharacterId, ExpLogEntry,
    ExpSource, LevelTransition, NewTask, Profile, RankingEntry, Task, TaskId, TaskLogEntry, User,
    UserCredentials, UserId,
};
use quest_core::ports::{AccountStore, PortError, PortResult, ProgressStore, StoreTx, TaskPatch};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the store ports over a Postgres pool.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps driver errors onto the port taxonomy.
fn db_err(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::RowNotFound => PortError::NotFound("row not found".to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            PortError::NotFound(db.message().to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const TASK_COLUMNS: &str =
    "todo_id, user_id, content, completed, completed_at, due_at, created_at, exp_given, exp_reward";

const CHARACTER_COLUMNS: &str =
    "character_id, user_id, character_name, exp, level, gold, created_at";

#[derive(FromRow)]
struct UserRecord {
    user_id: i64,
    nickname: String,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            nickname: self.nickname,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: i64,
    email: String,
    nickname: String,
    hashed_password: String,
}
impl CredentialsRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            nickname: self.nickname,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ProfileRecord {
    user_id: i64,
    current_streak: i32,
    longest_streak: i32,
}
impl ProfileRecord {
    fn to_domain(self) -> Profile {
        Profile {
            user_id: self.user_id,
            current_streak: self.current_streak,
            longest_streak: self.longest_streak,
        }
    }
}

#[derive(FromRow)]
struct TaskRecord {
    todo_id: i64,
    user_id: i64,
    content: String,
    completed: bool,
    completed_at: Option<DateTime<Utc>>,
    due_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    exp_given: bool,
    exp_reward: i32,
}
impl TaskRecord {
    fn to_domain(self) -> Task {
        Task {
            task_id: self.todo_id,
            user_id: self.user_id,
            content: self.content,
            completed: self.completed,
            completed_at: self.completed_at,
            due_at: self.due_at,
            created_at: self.created_at,
            exp_given: self.exp_given,
            exp_reward: self.exp_reward,
        }
    }
}

#[derive(FromRow)]
struct CharacterRecord {
    character_id: i64,
    user_id: i64,
    character_name: String,
    exp: i64,
    level: i32,
    gold: i64,
    created_at: DateTime<Utc>,
}
impl CharacterRecord {
    fn to_domain(self) -> Character {
        Character {
            character_id: self.character_id,
            user_id: self.user_id,
            character_name: self.character_name,
            exp: self.exp,
            level: self.level,
            gold: self.gold,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ExpLogRecord {
    user_id: i64,
    character_id: i64,
    todo_id: Option<i64>,
    achievement_id: Option<i32>,
    exp: i64,
    created_at: DateTime<Utc>,
}
impl ExpLogRecord {
    fn to_domain(self) -> PortResult<ExpLogEntry> {
        let source = match (self.todo_id, self.achievement_id) {
            (Some(task_id), None) => ExpSource::Task(task_id),
            (None, Some(achievement_id)) => ExpSource::Achievement(achievement_id),
            _ => {
                return Err(PortError::Unexpected(
                    "exp log row must reference exactly one source".to_string(),
                ))
            }
        };
        Ok(ExpLogEntry {
            user_id: self.user_id,
            character_id: self.character_id,
            source,
            exp: self.exp,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct AchievementRecord {
    achievement_id: i32,
    title: String,
    description: String,
    max_progress: i32,
    reward_xp: i32,
    reward_gold: i32,
}
impl AchievementRecord {
    fn to_domain(self) -> Achievement {
        Achievement {
            achievement_id: self.achievement_id,
            title: self.title,
            description: self.description,
            max_progress: self.max_progress,
            reward_xp: self.reward_xp,
            reward_gold: self.reward_gold,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    user_id: i64,
    achievement_id: i32,
    is_unlocked: bool,
    progress: i32,
    unlocked_at: Option<DateTime<Utc>>,
}
impl ProgressRecord {
    fn to_domain(self) -> AchievementProgress {
        AchievementProgress {
            user_id: self.user_id,
            achievement_id: self.achievement_id,
            is_unlocked: self.is_unlocked,
            progress: self.progress,
            unlocked_at: self.unlocked_at,
        }
    }
}

#[derive(FromRow)]
struct RankingRecord {
    user_id: i64,
    rank: i32,
    level: i32,
    total_exp: i64,
    nickname: Option<String>,
    calculated_at: DateTime<Utc>,
}
impl RankingRecord {
    fn to_domain(self) -> RankingEntry {
        RankingEntry {
            user_id: self.user_id,
            rank: self.rank,
            level: self.level,
            total_exp: self.total_exp,
            nickname: self.nickname,
            calculated_at: self.calculated_at,
        }
    }
}

//=========================================================================================
// `ProgressStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProgressStore for DbAdapter {
    async fn begin(&self) -> PortResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(DbTx { tx }))
    }

    async fn get_user(&self, user_id: UserId) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, nickname FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
            _ => db_err(e),
        })?;
        Ok(record.to_domain())
    }

    async fn get_profile(&self, user_id: UserId) -> PortResult<Option<Profile>> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT user_id, current_streak, longest_streak FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(ProfileRecord::to_domain))
    }

    async fn get_or_create_profile(&self, user_id: UserId) -> PortResult<Profile> {
        sqlx::query("INSERT INTO profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let record = sqlx::query_as::<_, ProfileRecord>(
            "SELECT user_id, current_streak, longest_streak FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn insert_task(&self, task: NewTask) -> PortResult<Task> {
        let sql = format!(
            "INSERT INTO todos (user_id, content, due_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) RETURNING {}",
            TASK_COLUMNS
        );
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task.user_id)
            .bind(&task.content)
            .bind(task.due_at)
            .bind(task.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn get_task(&self, task_id: TaskId) -> PortResult<Option<Task>> {
        let sql = format!("SELECT {} FROM todos WHERE todo_id = $1", TASK_COLUMNS);
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(record.map(TaskRecord::to_domain))
    }

    async fn patch_task(&self, task_id: TaskId, patch: &TaskPatch) -> PortResult<Task> {
        let sql = format!(
            "UPDATE todos SET \
                content = COALESCE($2, content), \
                completed = CASE WHEN $3 THEN $4::TIMESTAMPTZ IS NOT NULL ELSE completed END, \
                completed_at = CASE WHEN $3 THEN $4::TIMESTAMPTZ ELSE completed_at END, \
                updated_at = COALESCE($5, updated_at) \
             WHERE todo_id = $1 RETURNING {}",
            TASK_COLUMNS
        );
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .bind(patch.content.as_deref())
            .bind(patch.completion.is_some())
            .bind(patch.completion.flatten())
            .bind(patch.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Task {} not found", task_id)),
                _ => db_err(e),
            })?;
        Ok(record.to_domain())
    }

    async fn list_tasks_due_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM todos WHERE user_id = $1 AND due_at BETWEEN $2 AND $3 \
             ORDER BY due_at ASC, todo_id ASC",
            TASK_COLUMNS
        );
        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(records.into_iter().map(TaskRecord::to_domain).collect())
    }

    async fn list_tasks_created_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM todos WHERE user_id = $1 AND created_at >= $2 AND created_at < $3",
            TASK_COLUMNS
        );
        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(records.into_iter().map(TaskRecord::to_domain).collect())
    }

    async fn count_completions_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM todos WHERE user_id = $1 AND completed AND completed_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn count_completed(&self, user_id: UserId) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM todos WHERE user_id = $1 AND completed")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn count_completed_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM todos WHERE user_id = $1 AND completed \
             AND completed_at >= $2 AND completed_at < $3",
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn completion_times(&self, user_id: UserId) -> PortResult<Vec<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT completed_at FROM todos WHERE user_id = $1 AND completed \
             AND completed_at IS NOT NULL ORDER BY completed_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn get_character_for_user(&self, user_id: UserId) -> PortResult<Option<Character>> {
        let sql = format!(
            "SELECT {} FROM characters WHERE user_id = $1 ORDER BY character_id ASC LIMIT 1",
            CHARACTER_COLUMNS
        );
        let record = sqlx::query_as::<_, CharacterRecord>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(record.map(CharacterRecord::to_domain))
    }

    async fn list_characters(&self) -> PortResult<Vec<Character>> {
        let sql = format!(
            "SELECT {} FROM characters ORDER BY created_at DESC, character_id DESC",
            CHARACTER_COLUMNS
        );
        let records = sqlx::query_as::<_, CharacterRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(records.into_iter().map(CharacterRecord::to_domain).collect())
    }

    async fn list_characters_by_standing(&self) -> PortResult<Vec<Character>> {
        let sql = format!(
            "SELECT {} FROM characters ORDER BY level DESC, exp DESC, character_id ASC",
            CHARACTER_COLUMNS
        );
        let records = sqlx::query_as::<_, CharacterRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(records.into_iter().map(CharacterRecord::to_domain).collect())
    }

    async fn list_level_requirements(&self) -> PortResult<Vec<(i32, i64)>> {
        sqlx::query_as::<_, (i32, i64)>(
            "SELECT level, required_exp FROM level_requirements ORDER BY level ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_exp_log(&self, user_id: UserId) -> PortResult<Vec<ExpLogEntry>> {
        let records = sqlx::query_as::<_, ExpLogRecord>(
            "SELECT user_id, character_id, todo_id, achievement_id, exp, created_at \
             FROM exp_logs WHERE user_id = $1 ORDER BY created_at DESC, exp_log_id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        records.into_iter().map(ExpLogRecord::to_domain).collect()
    }

    async fn list_achievements(&self) -> PortResult<Vec<Achievement>> {
        let records = sqlx::query_as::<_, AchievementRecord>(
            "SELECT achievement_id, title, description, max_progress, reward_xp, reward_gold \
             FROM achievements ORDER BY achievement_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(AchievementRecord::to_domain).collect())
    }

    async fn get_achievement(
        &self,
        achievement_id: AchievementId,
    ) -> PortResult<Option<Achievement>> {
        let record = sqlx::query_as::<_, AchievementRecord>(
            "SELECT achievement_id, title, description, max_progress, reward_xp, reward_gold \
             FROM achievements WHERE achievement_id = $1",
        )
        .bind(achievement_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(AchievementRecord::to_domain))
    }

    async fn get_achievement_progress(
        &self,
        user_id: UserId,
        achievement_id: AchievementId,
    ) -> PortResult<Option<AchievementProgress>> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            "SELECT user_id, achievement_id, is_unlocked, progress, unlocked_at \
             FROM user_achievements WHERE user_id = $1 AND achievement_id = $2",
        )
        .bind(user_id)
        .bind(achievement_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(ProgressRecord::to_domain))
    }

    async fn list_achievement_progress(
        &self,
        user_id: UserId,
    ) -> PortResult<Vec<AchievementProgress>> {
        let records = sqlx::query_as::<_, ProgressRecord>(
            "SELECT user_id, achievement_id, is_unlocked, progress, unlocked_at \
             FROM user_achievements WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(ProgressRecord::to_domain).collect())
    }

    async fn unlocked_user_counts(&self) -> PortResult<HashMap<AchievementId, i64>> {
        let rows = sqlx::query_as::<_, (i32, i64)>(
            "SELECT achievement_id, COUNT(DISTINCT user_id) FROM user_achievements \
             WHERE is_unlocked GROUP BY achievement_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().collect())
    }

    async fn get_ranking_entry(&self, user_id: UserId) -> PortResult<Option<RankingEntry>> {
        let record = sqlx::query_as::<_, RankingRecord>(
            "SELECT user_id, rank, level, total_exp, nickname, calculated_at \
             FROM rankings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(record.map(RankingRecord::to_domain))
    }

    async fn upsert_ranking_entry(&self, entry: &RankingEntry) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO rankings (user_id, rank, level, total_exp, nickname, calculated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id) DO UPDATE SET \
                rank = EXCLUDED.rank, level = EXCLUDED.level, total_exp = EXCLUDED.total_exp, \
                nickname = EXCLUDED.nickname, calculated_at = EXCLUDED.calculated_at",
        )
        .bind(entry.user_id)
        .bind(entry.rank)
        .bind(entry.level)
        .bind(entry.total_exp)
        .bind(entry.nickname.as_deref())
        .bind(entry.calculated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_ranking(&self, limit: i64) -> PortResult<Vec<RankingEntry>> {
        let records = sqlx::query_as::<_, RankingRecord>(
            "SELECT user_id, rank, level, total_exp, nickname, calculated_at \
             FROM rankings ORDER BY rank ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(records.into_iter().map(RankingRecord::to_domain).collect())
    }
}

//=========================================================================================
// `StoreTx` Trait Implementation
//=========================================================================================

/// An open Postgres transaction. Dropping it without `commit` rolls back.
pub struct DbTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for DbTx {
    async fn lock_task(&mut self, task_id: TaskId) -> PortResult<Option<Task>> {
        let sql = format!("SELECT {} FROM todos WHERE todo_id = $1 FOR UPDATE", TASK_COLUMNS);
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(record.map(TaskRecord::to_domain))
    }

    async fn complete_task(
        &mut self,
        task_id: TaskId,
        at: DateTime<Utc>,
        reward: Option<i32>,
    ) -> PortResult<Task> {
        let sql = format!(
            "UPDATE todos SET \
                completed = TRUE, completed_at = $2, updated_at = $2, \
                exp_given = CASE WHEN $3::INT IS NULL THEN exp_given ELSE TRUE END, \
                exp_reward = COALESCE($3::INT, exp_reward) \
             WHERE todo_id = $1 RETURNING {}",
            TASK_COLUMNS
        );
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .bind(at)
            .bind(reward)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Task {} not found", task_id)),
                _ => db_err(e),
            })?;
        Ok(record.to_domain())
    }

    async fn delete_task(&mut self, task_id: TaskId) -> PortResult<()> {
        sqlx::query("DELETE FROM todos WHERE todo_id = $1")
            .bind(task_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_user(&mut self, user_id: UserId) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, nickname FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", user_id)),
            _ => db_err(e),
        })?;
        Ok(record.to_domain())
    }

    async fn rename_user(&mut self, user_id: UserId, nickname: &str) -> PortResult<()> {
        // Characters first: the subquery still sees the old nickname.
        sqlx::query(
            "UPDATE characters SET character_name = $2, updated_at = now() \
             WHERE user_id = $1 \
               AND character_name = (SELECT nickname FROM users WHERE user_id = $1)",
        )
        .bind(user_id)
        .bind(nickname)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let result = sqlx::query("UPDATE users SET nickname = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(nickname)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match db_err(e) {
                PortError::Conflict(_) => {
                    PortError::Conflict(format!("Nickname {} is taken", nickname))
                }
                other => other,
            })?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn completion_times(&mut self, user_id: UserId) -> PortResult<Vec<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT completed_at FROM todos WHERE user_id = $1 AND completed \
             AND completed_at IS NOT NULL ORDER BY completed_at DESC",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn save_streak(&mut self, profile: &Profile) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO profiles (user_id, current_streak, longest_streak, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (user_id) DO UPDATE SET \
                current_streak = EXCLUDED.current_streak, \
                longest_streak = EXCLUDED.longest_streak, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(profile.user_id)
        .bind(profile.current_streak)
        .bind(profile.longest_streak)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn add_character_exp(
        &mut self,
        user_id: UserId,
        character_name: &str,
        delta: i64,
        at: DateTime<Utc>,
    ) -> PortResult<Character> {
        let sql = format!(
            "INSERT INTO characters (user_id, character_name, exp, level, gold, created_at, updated_at) \
             VALUES ($1, $2, $3, 1, 0, $4, $4) \
             ON CONFLICT (user_id, character_name) DO UPDATE SET \
                exp = characters.exp + EXCLUDED.exp, updated_at = EXCLUDED.updated_at \
             RETURNING {}",
            CHARACTER_COLUMNS
        );
        let record = sqlx::query_as::<_, CharacterRecord>(&sql)
            .bind(user_id)
            .bind(character_name)
            .bind(delta)
            .bind(at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(record.to_domain())
    }

    async fn lock_character(
        &mut self,
        user_id: UserId,
        character_name: &str,
    ) -> PortResult<Option<Character>> {
        let sql = format!(
            "SELECT {} FROM characters WHERE user_id = $1 AND character_name = $2 FOR UPDATE",
            CHARACTER_COLUMNS
        );
        let record = sqlx::query_as::<_, CharacterRecord>(&sql)
            .bind(user_id)
            .bind(character_name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(record.map(CharacterRecord::to_domain))
    }

    async fn set_character_progress(
        &mut self,
        character_id: CharacterId,
        exp: i64,
        level: i32,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE characters SET exp = $2, level = $3, updated_at = $4 WHERE character_id = $1",
        )
        .bind(character_id)
        .bind(exp)
        .bind(level)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Character {} not found", character_id)));
        }
        Ok(())
    }

    async fn credit_character(
        &mut self,
        user_id: UserId,
        exp: i64,
        gold: i64,
        at: DateTime<Utc>,
    ) -> PortResult<Option<Character>> {
        let sql = format!(
            "UPDATE characters SET exp = exp + $2, gold = gold + $3, updated_at = $4 \
             WHERE character_id = ( \
                SELECT character_id FROM characters WHERE user_id = $1 \
                ORDER BY character_id ASC LIMIT 1) \
             RETURNING {}",
            CHARACTER_COLUMNS
        );
        let record = sqlx::query_as::<_, CharacterRecord>(&sql)
            .bind(user_id)
            .bind(exp)
            .bind(gold)
            .bind(at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(record.map(CharacterRecord::to_domain))
    }

    async fn insert_achievement_progress(
        &mut self,
        progress: &AchievementProgress,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT INTO user_achievements (user_id, achievement_id, is_unlocked, progress, unlocked_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id, achievement_id) DO NOTHING",
        )
        .bind(progress.user_id)
        .bind(progress.achievement_id)
        .bind(progress.is_unlocked)
        .bind(progress.progress)
        .bind(progress.unlocked_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_exp_log(&mut self, entry: &ExpLogEntry) -> PortResult<()> {
        let (todo_id, achievement_id) = match entry.source {
            ExpSource::Task(task_id) => (Some(task_id), None),
            ExpSource::Achievement(achievement_id) => (None, Some(achievement_id)),
        };
        sqlx::query(
            "INSERT INTO exp_logs (user_id, character_id, todo_id, achievement_id, exp, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.user_id)
        .bind(entry.character_id)
        .bind(todo_id)
        .bind(achievement_id)
        .bind(entry.exp)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_level_transition(&mut self, transition: &LevelTransition) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO level_up_logs (character_id, previous_level, new_level, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(transition.character_id)
        .bind(transition.previous_level)
        .bind(transition.new_level)
        .bind(transition.at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_task_log(&mut self, entry: &TaskLogEntry) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO todo_logs (todo_id, user_id, action, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.task_id)
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        self.tx.commit().await.map_err(db_err)
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        nickname: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (email, hashed_password, nickname) VALUES ($1, $2, $3) \
             RETURNING user_id, nickname",
        )
        .bind(email)
        .bind(hashed_password)
        .bind(nickname)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_err(e) {
            PortError::Conflict(_) => {
                PortError::Conflict(format!("Email {} is already registered", email))
            }
            other => other,
        })?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, nickname, hashed_password FROM users \
             WHERE email = $1 AND hashed_password IS NOT NULL",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("User {} not found", email)),
            _ => db_err(e),
        })?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (session_id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn validate_auth_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT u.user_id, u.nickname FROM auth_sessions s \
             JOIN users u ON u.user_id = s.user_id \
             WHERE s.session_id = $1 AND s.expires_at > $2",
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        record
            .map(UserRecord::to_domain)
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
