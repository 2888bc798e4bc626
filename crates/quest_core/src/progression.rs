//! crates/quest_core/src/progression.rs
//!
//! The progression engine: task completion, deletion and edits, and the
//! character state they drive. Every multi-step mutation runs inside one store
//! transaction; returning early with `?` drops the transaction and rolls it back.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::calendar::Calendar;
use crate::domain::{
    Character, CompletionEvent, ExpLogEntry, ExpSource, LevelTransition, NewTask, Profile, Task,
    TaskAction, TaskEdit, TaskId, TaskLogEntry, TaskState, User, UserId,
};
use crate::error::{EngineError, EngineResult};
use crate::guard::{check_completion_rate, RatePolicy};
use crate::levels::{level_image_url, LevelTable};
use crate::ports::{Clock, CompletionEventSink, ProgressStore, StoreTx, TaskPatch};
use crate::streak::compute_streak;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Experience paid for completing a task.
    pub completion_reward: i32,
    pub rate: RatePolicy,
    pub calendar: Calendar,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            completion_reward: 100,
            rate: RatePolicy::default(),
            calendar: Calendar::utc(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub exp: i32,
    pub exp_given: bool,
    pub leveled_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub message: String,
    pub leveled_down: bool,
}

/// A character together with its distance to the next level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterView {
    pub character: Character,
    /// Requirement of the current level; 0 at max level.
    pub next_level_exp: i64,
    pub remaining_exp: i64,
    pub image_url: &'static str,
}

pub struct ProgressionEngine {
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    levels: Arc<LevelTable>,
    events: Arc<dyn CompletionEventSink>,
    settings: EngineSettings,
}

impl ProgressionEngine {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        clock: Arc<dyn Clock>,
        levels: Arc<LevelTable>,
        events: Arc<dyn CompletionEventSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            levels,
            events,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    //=====================================================================================
    // Completion
    //=====================================================================================

    /// Completes a task, paying its experience at most once over its lifetime.
    pub async fn complete_task(&self, task_id: TaskId) -> EngineResult<CompletionOutcome> {
        let now = self.clock.now();
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Task {} not found", task_id)))?;

        check_completion_rate(self.store.as_ref(), &self.settings.rate, task.user_id, now).await?;

        let mut tx = self.store.begin().await?;
        // The flags are re-read under the row lock so two concurrent calls
        // cannot both see an unpaid task.
        let task = tx
            .lock_task(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Task {} not found", task_id)))?;

        match task.state() {
            TaskState::Pending => {
                let leveled_up = self.pay_completion(tx.as_mut(), &task, now).await?;
                tx.commit().await?;
                info!(
                    task_id,
                    user_id = task.user_id,
                    reward = self.settings.completion_reward,
                    leveled_up,
                    "Task completed and rewarded"
                );
                self.publish_completion(&task);
                Ok(CompletionOutcome {
                    exp: self.settings.completion_reward,
                    exp_given: true,
                    leveled_up,
                })
            }
            TaskState::ReopenedRewarded => {
                tx.complete_task(task_id, now, None).await?;
                tx.commit().await?;
                info!(task_id, "Task completed again, reward already paid");
                self.publish_completion(&task);
                Ok(CompletionOutcome {
                    exp: task.exp_reward,
                    exp_given: true,
                    leveled_up: false,
                })
            }
            TaskState::CompletedRewarded => Ok(CompletionOutcome {
                exp: task.exp_reward,
                exp_given: true,
                leveled_up: false,
            }),
            TaskState::CompletedUnrewarded => {
                error!(task_id, user_id = task.user_id, "Completed task without a reward record");
                Err(EngineError::InconsistentState { task_id })
            }
        }
    }

    /// `complete_task` for a caller that must own the task.
    pub async fn complete_owned_task(
        &self,
        task_id: TaskId,
        requester: &User,
    ) -> EngineResult<CompletionOutcome> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Task {} not found", task_id)))?;
        if task.user_id != requester.user_id {
            return Err(EngineError::Forbidden(format!(
                "Task {} belongs to another user",
                task_id
            )));
        }
        self.complete_task(task_id).await
    }

    /// The rewarded completion path. Returns whether the character leveled up.
    async fn pay_completion(
        &self,
        tx: &mut dyn StoreTx,
        task: &Task,
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let reward = self.settings.completion_reward;
        let task = tx.complete_task(task.task_id, now, Some(reward)).await?;
        let user = tx.get_user(task.user_id).await?;

        let history = tx.completion_times(user.user_id).await?;
        let streak = compute_streak(&history, &self.settings.calendar, now);
        tx.save_streak(&Profile {
            user_id: user.user_id,
            current_streak: streak.current,
            longest_streak: streak.longest,
        })
        .await?;

        let character = tx
            .add_character_exp(user.user_id, &user.nickname, i64::from(reward), now)
            .await?;
        tx.append_exp_log(&ExpLogEntry {
            user_id: user.user_id,
            character_id: character.character_id,
            source: ExpSource::Task(task.task_id),
            exp: i64::from(reward),
            created_at: now,
        })
        .await?;

        let resolution = self.levels.resolve_up(character.exp, character.level);
        if resolution.changed_level() {
            tx.set_character_progress(character.character_id, resolution.exp, resolution.level, now)
                .await?;
            for (previous_level, new_level) in &resolution.steps {
                tx.append_level_transition(&LevelTransition {
                    character_id: character.character_id,
                    previous_level: *previous_level,
                    new_level: *new_level,
                    at: now,
                })
                .await?;
            }
            info!(
                character_id = character.character_id,
                level = resolution.level,
                "Character leveled up"
            );
        }

        tx.append_task_log(&TaskLogEntry {
            task_id: task.task_id,
            user_id: task.user_id,
            action: TaskAction::Complete,
            created_at: now,
        })
        .await?;

        Ok(resolution.changed_level())
    }

    fn publish_completion(&self, task: &Task) {
        self.events.publish(CompletionEvent {
            user_id: task.user_id,
            task_id: task.task_id,
        });
    }

    //=====================================================================================
    // Deletion & Edits
    //=====================================================================================

    /// Deletes a task, taking back any experience it paid.
    pub async fn delete_task(&self, task_id: TaskId, requester: &User) -> EngineResult<DeletionOutcome> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let Some(task) = tx.lock_task(task_id).await? else {
            return Ok(DeletionOutcome {
                message: "Task already deleted".to_string(),
                leveled_down: false,
            });
        };
        if task.user_id != requester.user_id {
            return Err(EngineError::Forbidden(format!(
                "Task {} belongs to another user",
                task_id
            )));
        }

        let mut leveled_down = false;
        if task.exp_given && task.exp_reward > 0 {
            let owner = tx.get_user(task.user_id).await?;
            match tx.lock_character(owner.user_id, &owner.nickname).await? {
                Some(character) => {
                    let reward = i64::from(task.exp_reward);
                    let resolution = self.levels.resolve_down(character.exp - reward, character.level);
                    tx.set_character_progress(
                        character.character_id,
                        resolution.exp,
                        resolution.level,
                        now,
                    )
                    .await?;
                    for (previous_level, new_level) in &resolution.steps {
                        tx.append_level_transition(&LevelTransition {
                            character_id: character.character_id,
                            previous_level: *previous_level,
                            new_level: *new_level,
                            at: now,
                        })
                        .await?;
                    }
                    tx.append_exp_log(&ExpLogEntry {
                        user_id: task.user_id,
                        character_id: character.character_id,
                        source: ExpSource::Task(task.task_id),
                        exp: -reward,
                        created_at: now,
                    })
                    .await?;
                    leveled_down = resolution.changed_level();
                }
                None => warn!(
                    task_id,
                    user_id = task.user_id,
                    "Rewarded task has no character to take experience back from"
                ),
            }
        }

        tx.append_task_log(&TaskLogEntry {
            task_id: task.task_id,
            user_id: task.user_id,
            action: TaskAction::Delete,
            created_at: now,
        })
        .await?;
        tx.delete_task(task_id).await?;
        tx.commit().await?;

        info!(task_id, leveled_down, "Task deleted");
        Ok(DeletionOutcome {
            message: "Task deleted".to_string(),
            leveled_down,
        })
    }

    /// Changes content or completion of an owned task. Never pays or takes
    /// back experience.
    pub async fn edit_task(&self, task_id: TaskId, requester: &User, edit: TaskEdit) -> EngineResult<Task> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Task {} not found", task_id)))?;
        if task.user_id != requester.user_id {
            return Err(EngineError::Forbidden(format!(
                "Task {} belongs to another user",
                task_id
            )));
        }
        if let Some(content) = &edit.content {
            validate_content(content)?;
        }

        let now = self.clock.now();
        let patch = TaskPatch {
            content: edit.content,
            completion: edit.completed.map(|done| done.then_some(now)),
            updated_at: Some(now),
        };
        Ok(self.store.patch_task(task_id, &patch).await?)
    }

    pub async fn add_task(
        &self,
        user: &User,
        content: &str,
        due_at: Option<DateTime<Utc>>,
    ) -> EngineResult<Task> {
        validate_content(content)?;
        let now = self.clock.now();
        let task = self
            .store
            .insert_task(NewTask {
                user_id: user.user_id,
                content: content.to_string(),
                due_at: due_at.unwrap_or(now),
                created_at: now,
            })
            .await?;
        Ok(task)
    }

    /// Tasks due within the given UTC calendar month.
    pub async fn get_tasks(&self, user: &User, year: i32, month: u32) -> EngineResult<Vec<Task>> {
        let (start, end) = month_window(year, month)?;
        Ok(self
            .store
            .list_tasks_due_between(user.user_id, start, end)
            .await?)
    }

    //=====================================================================================
    // Reads
    //=====================================================================================

    pub async fn profile(&self, user_id: UserId) -> EngineResult<Profile> {
        Ok(self.store.get_or_create_profile(user_id).await?)
    }

    pub async fn my_character(&self, user: &User) -> EngineResult<CharacterView> {
        let character = self
            .store
            .get_character_for_user(user.user_id)
            .await?
            .ok_or(EngineError::CharacterNotFound {
                user_id: user.user_id,
            })?;
        let next_level_exp = self.levels.next_level_exp(character.level);
        let remaining_exp = if next_level_exp > 0 {
            next_level_exp - character.exp
        } else {
            0
        };
        Ok(CharacterView {
            image_url: level_image_url(character.level),
            next_level_exp,
            remaining_exp,
            character,
        })
    }

    pub async fn all_characters(&self) -> EngineResult<Vec<Character>> {
        Ok(self.store.list_characters().await?)
    }

    pub async fn exp_ledger(&self, user: &User) -> EngineResult<Vec<ExpLogEntry>> {
        Ok(self.store.list_exp_log(user.user_id).await?)
    }

    /// Renames the user and the character keyed by the old nickname together.
    pub async fn change_nickname(&self, user: &User, nickname: &str) -> EngineResult<User> {
        let nickname = nickname.trim();
        let length = nickname.chars().count();
        if !(2..=15).contains(&length) {
            return Err(EngineError::Invalid(
                "Nickname must be between 2 and 15 characters".to_string(),
            ));
        }
        let mut tx = self.store.begin().await?;
        tx.rename_user(user.user_id, nickname).await?;
        let renamed = tx.get_user(user.user_id).await?;
        tx.commit().await?;
        info!(user_id = user.user_id, "Nickname changed");
        Ok(renamed)
    }
}

fn validate_content(content: &str) -> EngineResult<()> {
    if content.trim().is_empty() {
        return Err(EngineError::Invalid("Task content must not be empty".to_string()));
    }
    Ok(())
}

/// `[first instant, last millisecond]` of a UTC calendar month.
pub fn month_window(year: i32, month: u32) -> EngineResult<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || EngineError::Invalid(format!("{}-{} is not a valid month", year, month));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    let start = Utc.from_utc_datetime(&first.and_time(chrono::NaiveTime::MIN));
    let end = Utc.from_utc_datetime(&next.and_time(chrono::NaiveTime::MIN)) - Duration::milliseconds(1);
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ManualClock;
    use crate::events::ChannelEventSink;
    use crate::memory::MemoryStore;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        store: MemoryStore,
        clock: Arc<ManualClock>,
        engine: ProgressionEngine,
        events: UnboundedReceiver<CompletionEvent>,
    }

    fn harness_with(settings: EngineSettings) -> Harness {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new("2024-05-21T10:00:00Z".parse().unwrap()));
        let (sink, events) = ChannelEventSink::new();
        let engine = ProgressionEngine::new(
            Arc::new(store.clone()),
            clock.clone(),
            Arc::new(LevelTable::standard()),
            Arc::new(sink),
            settings,
        );
        Harness {
            store,
            clock,
            engine,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(EngineSettings::default())
    }

    async fn character(h: &Harness, user: &User) -> Option<Character> {
        h.store.get_character_for_user(user.user_id).await.unwrap()
    }

    #[tokio::test]
    async fn completion_pays_once() {
        let mut h = harness();
        let user = h.store.add_user("ada").await;
        let task = h.engine.add_task(&user, "water plants", None).await.unwrap();

        let first = h.engine.complete_task(task.task_id).await.unwrap();
        assert_eq!(
            first,
            CompletionOutcome {
                exp: 100,
                exp_given: true,
                leveled_up: true
            }
        );
        let after_first = character(&h, &user).await.unwrap();
        assert_eq!((after_first.exp, after_first.level), (0, 2));

        h.clock.advance(Duration::seconds(20));
        let second = h.engine.complete_task(task.task_id).await.unwrap();
        assert_eq!(second.exp, 100);
        assert!(!second.leveled_up);

        // Reopen through an edit, then complete again.
        h.clock.advance(Duration::seconds(20));
        h.engine
            .edit_task(
                task.task_id,
                &user,
                TaskEdit {
                    completed: Some(false),
                    ..TaskEdit::default()
                },
            )
            .await
            .unwrap();
        let third = h.engine.complete_task(task.task_id).await.unwrap();
        assert_eq!(third.exp, 100);

        assert_eq!(character(&h, &user).await, Some(after_first));
        assert_eq!(h.store.exp_log().await.len(), 1);
        let stored = h.store.get_task(task.task_id).await.unwrap().unwrap();
        assert!(stored.completed && stored.exp_given);
        assert_eq!(stored.exp_reward, 100);

        assert!(h.events.try_recv().is_ok());
        assert!(h.events.try_recv().is_ok());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn third_completion_in_window_is_refused() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        let mut ids = Vec::new();
        for content in ["one", "two", "three"] {
            ids.push(h.engine.add_task(&user, content, None).await.unwrap().task_id);
        }

        h.engine.complete_task(ids[0]).await.unwrap();
        h.clock.advance(Duration::seconds(4));
        h.engine.complete_task(ids[1]).await.unwrap();
        h.clock.advance(Duration::seconds(4));
        let third = h.engine.complete_task(ids[2]).await;
        assert!(matches!(
            third,
            Err(EngineError::RateExceeded {
                cheating_detected: true
            })
        ));
        let untouched = h.store.get_task(ids[2]).await.unwrap().unwrap();
        assert!(!untouched.completed && !untouched.exp_given);

        h.clock.advance(Duration::seconds(15));
        assert!(h.engine.complete_task(ids[2]).await.is_ok());
    }

    #[tokio::test]
    async fn delete_restores_pre_completion_state() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        h.store.put_character(user.user_id, "ada", 150, 2).await;
        let task = h.engine.add_task(&user, "stretch", None).await.unwrap();

        let completed = h.engine.complete_task(task.task_id).await.unwrap();
        assert!(completed.leveled_up);
        let leveled = character(&h, &user).await.unwrap();
        assert_eq!((leveled.exp, leveled.level), (50, 3));

        let deleted = h.engine.delete_task(task.task_id, &user).await.unwrap();
        assert!(deleted.leveled_down);
        assert_eq!(deleted.message, "Task deleted");
        let restored = character(&h, &user).await.unwrap();
        assert_eq!((restored.exp, restored.level), (150, 2));

        let ledger = h.store.exp_log().await;
        assert_eq!(ledger.iter().map(|e| e.exp).sum::<i64>(), 0);
        let levels = h.store.level_log().await;
        assert_eq!(levels.len(), 2);
        assert_eq!((levels[1].previous_level, levels[1].new_level), (3, 2));
        let actions: Vec<_> = h.store.task_log().await.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![TaskAction::Complete, TaskAction::Delete]);
        assert!(h.store.get_task(task.task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_clamps_at_floor() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        let rewarded = h
            .store
            .put_task(Task {
                task_id: 0,
                user_id: user.user_id,
                content: "old".to_string(),
                completed: true,
                completed_at: Some(h.clock.now()),
                due_at: h.clock.now(),
                created_at: h.clock.now(),
                exp_given: true,
                exp_reward: 500,
            })
            .await;
        h.store.put_character(user.user_id, "ada", 30, 2).await;

        let deleted = h.engine.delete_task(rewarded.task_id, &user).await.unwrap();
        assert!(deleted.leveled_down);
        let character = character(&h, &user).await.unwrap();
        assert_eq!((character.exp, character.level), (0, 1));
    }

    #[tokio::test]
    async fn deleting_a_missing_task_succeeds() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        let outcome = h.engine.delete_task(404, &user).await.unwrap();
        assert_eq!(outcome.message, "Task already deleted");
        assert!(!outcome.leveled_down);
    }

    #[tokio::test]
    async fn non_owner_cannot_touch_a_task() {
        let h = harness();
        let owner = h.store.add_user("ada").await;
        let intruder = h.store.add_user("bob").await;
        let task = h.engine.add_task(&owner, "mine", None).await.unwrap();

        let completed = h.engine.complete_owned_task(task.task_id, &intruder).await;
        assert!(matches!(completed, Err(EngineError::Forbidden(_))));
        let deleted = h.engine.delete_task(task.task_id, &intruder).await;
        assert!(matches!(deleted, Err(EngineError::Forbidden(_))));
        let edited = h
            .engine
            .edit_task(
                task.task_id,
                &intruder,
                TaskEdit {
                    content: Some("yours".to_string()),
                    completed: Some(true),
                },
            )
            .await;
        assert!(matches!(edited, Err(EngineError::Forbidden(_))));

        assert_eq!(h.store.get_task(task.task_id).await.unwrap(), Some(task));
    }

    #[tokio::test]
    async fn edit_toggles_completion_without_paying() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        let task = h.engine.add_task(&user, "draft", None).await.unwrap();

        let edited = h
            .engine
            .edit_task(
                task.task_id,
                &user,
                TaskEdit {
                    content: Some("final".to_string()),
                    completed: Some(true),
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.content, "final");
        assert_eq!(edited.completed_at, Some(h.clock.now()));
        assert!(!edited.exp_given);
        assert!(character(&h, &user).await.is_none());

        let result = h.engine.complete_task(task.task_id).await;
        assert!(matches!(result, Err(EngineError::InconsistentState { .. })));
    }

    #[tokio::test]
    async fn failed_step_rolls_back_everything() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        let task = h.engine.add_task(&user, "flaky", None).await.unwrap();
        h.store.fail_next("append_task_log");

        let result = h.engine.complete_task(task.task_id).await;
        assert!(matches!(result, Err(EngineError::OperationFailed(_))));

        let stored = h.store.get_task(task.task_id).await.unwrap().unwrap();
        assert!(!stored.completed && !stored.exp_given);
        assert!(character(&h, &user).await.is_none());
        assert!(h.store.exp_log().await.is_empty());
        assert!(h.store.get_profile(user.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn large_grant_jumps_several_levels() {
        let h = harness_with(EngineSettings {
            completion_reward: 1000,
            ..EngineSettings::default()
        });
        let user = h.store.add_user("ada").await;
        let task = h.engine.add_task(&user, "marathon", None).await.unwrap();

        h.engine.complete_task(task.task_id).await.unwrap();
        let character = character(&h, &user).await.unwrap();
        assert_eq!((character.exp, character.level), (0, 5));
        assert_eq!(h.store.level_log().await.len(), 4);
    }

    #[tokio::test]
    async fn completion_updates_streak() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        let yesterday = h.clock.now() - Duration::days(1);
        h.store
            .put_task(Task {
                task_id: 0,
                user_id: user.user_id,
                content: "yesterday".to_string(),
                completed: true,
                completed_at: Some(yesterday),
                due_at: yesterday,
                created_at: yesterday,
                exp_given: true,
                exp_reward: 100,
            })
            .await;
        let task = h.engine.add_task(&user, "today", None).await.unwrap();

        h.engine.complete_task(task.task_id).await.unwrap();
        let profile = h.engine.profile(user.user_id).await.unwrap();
        assert_eq!((profile.current_streak, profile.longest_streak), (2, 2));
    }

    #[tokio::test]
    async fn character_view_reports_distance_to_next_level() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        assert!(matches!(
            h.engine.my_character(&user).await,
            Err(EngineError::CharacterNotFound { .. })
        ));

        h.store.put_character(user.user_id, "ada", 120, 3).await;
        let view = h.engine.my_character(&user).await.unwrap();
        assert_eq!(view.next_level_exp, 300);
        assert_eq!(view.remaining_exp, 180);
    }

    #[tokio::test]
    async fn nickname_change_renames_character() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        h.store.add_user("bob").await;
        h.store.put_character(user.user_id, "ada", 0, 1).await;

        assert!(matches!(
            h.engine.change_nickname(&user, "x").await,
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            h.engine.change_nickname(&user, "bob").await,
            Err(EngineError::Conflict(_))
        ));

        let renamed = h.engine.change_nickname(&user, " lovelace ").await.unwrap();
        assert_eq!(renamed.nickname, "lovelace");
        assert_eq!(character(&h, &user).await.unwrap().character_name, "lovelace");
    }

    #[tokio::test]
    async fn tasks_are_filtered_by_due_month() {
        let h = harness();
        let user = h.store.add_user("ada").await;
        let may = "2024-05-31T23:59:59Z".parse().unwrap();
        let june = "2024-06-01T00:00:00Z".parse().unwrap();
        h.engine.add_task(&user, "may", Some(may)).await.unwrap();
        h.engine.add_task(&user, "june", Some(june)).await.unwrap();

        let tasks = h.engine.get_tasks(&user, 2024, 5).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].content, "may");
        assert!(matches!(h.engine.get_tasks(&user, 2024, 13).await, Err(EngineError::Invalid(_))));
    }

    fn shared_engine(store: &MemoryStore, settings: EngineSettings) -> Arc<ProgressionEngine> {
        let clock = Arc::new(ManualClock::new("2024-05-21T10:00:00Z".parse().unwrap()));
        let (sink, _events) = ChannelEventSink::new();
        Arc::new(ProgressionEngine::new(
            Arc::new(store.clone()),
            clock,
            Arc::new(LevelTable::standard()),
            Arc::new(sink),
            settings,
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_completions_of_one_task_pay_once() {
        let store = MemoryStore::new();
        let engine = shared_engine(&store, EngineSettings::default());
        let user = store.add_user("ada").await;
        let task_id = engine.add_task(&user, "race", None).await.unwrap().task_id;

        let (a, b) = tokio::join!(
            tokio::spawn({
                let engine = engine.clone();
                async move { engine.complete_task(task_id).await }
            }),
            tokio::spawn({
                let engine = engine.clone();
                async move { engine.complete_task(task_id).await }
            }),
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();

        assert!(a.exp_given && b.exp_given);
        assert_eq!(u8::from(a.leveled_up) + u8::from(b.leveled_up), 1);
        assert_eq!(store.exp_log().await.len(), 1);
        let character = store.get_character_for_user(user.user_id).await.unwrap().unwrap();
        assert_eq!((character.exp, character.level), (0, 2));
        let stored = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(stored.exp_reward, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn racing_completions_of_two_tasks_keep_both_grants() {
        let store = MemoryStore::new();
        let settings = EngineSettings {
            rate: RatePolicy {
                max_recent: 10,
                ..RatePolicy::default()
            },
            ..EngineSettings::default()
        };
        let engine = shared_engine(&store, settings);
        let user = store.add_user("ada").await;
        let first = engine.add_task(&user, "one", None).await.unwrap().task_id;
        let second = engine.add_task(&user, "two", None).await.unwrap().task_id;

        let (a, b) = tokio::join!(
            tokio::spawn({
                let engine = engine.clone();
                async move { engine.complete_task(first).await }
            }),
            tokio::spawn({
                let engine = engine.clone();
                async move { engine.complete_task(second).await }
            }),
        );
        assert!(a.unwrap().unwrap().exp_given);
        assert!(b.unwrap().unwrap().exp_given);

        let granted: i64 = store.exp_log().await.iter().map(|e| e.exp).sum();
        assert_eq!(granted, 200);
        // 100 clears level 1, the remaining 100 sits in level 2.
        let character = store.get_character_for_user(user.user_id).await.unwrap().unwrap();
        assert_eq!((character.exp, character.level), (100, 2));
        assert_eq!(store.level_log().await.len(), 1);
    }

    #[test]
    fn month_window_spans_december() {
        let (start, end) = month_window(2023, 12).unwrap();
        assert_eq!(start, "2023-12-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(end, "2023-12-31T23:59:59.999Z".parse::<DateTime<Utc>>().unwrap());
    }
}
