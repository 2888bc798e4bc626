//! crates/quest_core/src/memory.rs
//!
//! An in-memory implementation of the store ports. Used by the test suites and
//! by the `memory` backend of the API service for local runs.
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! copy of the state; `commit` swaps the copy in, dropping it discards it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::achievements::catalog;
use crate::domain::{
    Achievement, AchievementId, AchievementProgress, Character, CharacterId, ExpLogEntry,
    LevelTransition, NewTask, Profile, RankingEntry, Task, TaskId, TaskLogEntry, User,
    UserCredentials, UserId,
};
use crate::levels::LevelTable;
use crate::ports::{
    AccountStore, PortError, PortResult, ProgressStore, StoreTx, TaskPatch,
};

#[derive(Debug, Clone)]
struct UserRow {
    user_id: UserId,
    nickname: String,
    email: Option<String>,
    hashed_password: Option<String>,
}

impl UserRow {
    fn to_domain(&self) -> User {
        User {
            user_id: self.user_id,
            nickname: self.nickname.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    users: BTreeMap<UserId, UserRow>,
    sessions: HashMap<String, (UserId, DateTime<Utc>)>,
    profiles: BTreeMap<UserId, Profile>,
    tasks: BTreeMap<TaskId, Task>,
    characters: BTreeMap<CharacterId, Character>,
    level_requirements: BTreeMap<i32, i64>,
    exp_log: Vec<ExpLogEntry>,
    level_log: Vec<LevelTransition>,
    task_log: Vec<TaskLogEntry>,
    achievements: BTreeMap<AchievementId, Achievement>,
    progress: BTreeMap<(UserId, AchievementId), AchievementProgress>,
    ranking: BTreeMap<UserId, RankingEntry>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user(&self, user_id: UserId) -> PortResult<User> {
        self.users
            .get(&user_id)
            .map(UserRow::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    fn nickname_taken(&self, nickname: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.nickname == nickname && Some(u.user_id) != except)
    }

    fn completed_tasks(&self, user_id: UserId) -> impl Iterator<Item = &Task> {
        self.tasks
            .values()
            .filter(move |t| t.user_id == user_id && t.completed)
    }

    fn completion_times(&self, user_id: UserId) -> Vec<DateTime<Utc>> {
        let mut times: Vec<_> = self
            .completed_tasks(user_id)
            .filter_map(|t| t.completed_at)
            .collect();
        times.sort_unstable_by(|a, b| b.cmp(a));
        times
    }

    fn character_by_name(&self, user_id: UserId, name: &str) -> Option<&Character> {
        self.characters
            .values()
            .find(|c| c.user_id == user_id && c.character_name == name)
    }

    fn task_mut(&mut self, task_id: TaskId) -> PortResult<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| PortError::NotFound(format!("Task {} not found", task_id)))
    }
}

/// A process-local store with transactional semantics.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<AsyncMutex<State>>,
    faults: Arc<Mutex<HashSet<&'static str>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store seeded with the standard level table and the achievement catalog.
    pub fn new() -> Self {
        Self::with_levels(&LevelTable::standard())
    }

    pub fn with_levels(levels: &LevelTable) -> Self {
        let mut state = State::default();
        state.level_requirements = levels.iter().collect();
        state.achievements = catalog()
            .into_iter()
            .map(|a| (a.achievement_id, a))
            .collect();
        Self {
            state: Arc::new(AsyncMutex::new(state)),
            faults: Arc::default(),
        }
    }

    /// Makes the next call of the named operation fail with `Unexpected`.
    pub fn fail_next(&self, operation: &'static str) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(operation);
    }

    fn trip(&self, operation: &'static str) -> PortResult<()> {
        trip(&self.faults, operation)
    }

    /// Registers a user without credentials.
    pub async fn add_user(&self, nickname: &str) -> User {
        let mut state = self.state.lock().await;
        let user_id = state.next_id();
        let row = UserRow {
            user_id,
            nickname: nickname.to_string(),
            email: None,
            hashed_password: None,
        };
        let user = row.to_domain();
        state.users.insert(user_id, row);
        user
    }

    /// Stores a task as given, assigning a fresh id when `task_id` is 0.
    pub async fn put_task(&self, mut task: Task) -> Task {
        let mut state = self.state.lock().await;
        if task.task_id == 0 {
            task.task_id = state.next_id();
        }
        state.tasks.insert(task.task_id, task.clone());
        task
    }

    pub async fn put_character(&self, user_id: UserId, name: &str, exp: i64, level: i32) -> Character {
        let mut state = self.state.lock().await;
        let character = Character {
            character_id: state.next_id(),
            user_id,
            character_name: name.to_string(),
            exp,
            level,
            gold: 0,
            created_at: DateTime::<Utc>::MIN_UTC,
        };
        state
            .characters
            .insert(character.character_id, character.clone());
        character
    }

    pub async fn exp_log(&self) -> Vec<ExpLogEntry> {
        self.state.lock().await.exp_log.clone()
    }

    pub async fn level_log(&self) -> Vec<LevelTransition> {
        self.state.lock().await.level_log.clone()
    }

    pub async fn task_log(&self) -> Vec<TaskLogEntry> {
        self.state.lock().await.task_log.clone()
    }
}

fn trip(faults: &Mutex<HashSet<&'static str>>, operation: &'static str) -> PortResult<()> {
    let tripped = faults
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(operation);
    if tripped {
        return Err(PortError::Unexpected(format!("injected failure in {}", operation)));
    }
    Ok(())
}

//=========================================================================================
// `ProgressStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn begin(&self) -> PortResult<Box<dyn StoreTx>> {
        self.trip("begin")?;
        let guard = self.state.clone().lock_owned().await;
        let working = State::clone(&guard);
        Ok(Box::new(MemoryTx {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn get_user(&self, user_id: UserId) -> PortResult<User> {
        self.state.lock().await.user(user_id)
    }

    async fn get_profile(&self, user_id: UserId) -> PortResult<Option<Profile>> {
        Ok(self.state.lock().await.profiles.get(&user_id).cloned())
    }

    async fn get_or_create_profile(&self, user_id: UserId) -> PortResult<Profile> {
        let mut state = self.state.lock().await;
        state.user(user_id)?;
        let profile = state.profiles.entry(user_id).or_insert_with(|| Profile {
            user_id,
            ..Profile::default()
        });
        Ok(profile.clone())
    }

    async fn insert_task(&self, task: NewTask) -> PortResult<Task> {
        let mut state = self.state.lock().await;
        state.user(task.user_id)?;
        let task = Task {
            task_id: state.next_id(),
            user_id: task.user_id,
            content: task.content,
            completed: false,
            completed_at: None,
            due_at: task.due_at,
            created_at: task.created_at,
            exp_given: false,
            exp_reward: 0,
        };
        state.tasks.insert(task.task_id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: TaskId) -> PortResult<Option<Task>> {
        Ok(self.state.lock().await.tasks.get(&task_id).cloned())
    }

    async fn patch_task(&self, task_id: TaskId, patch: &TaskPatch) -> PortResult<Task> {
        self.trip("patch_task")?;
        let mut state = self.state.lock().await;
        let task = state.task_mut(task_id)?;
        if let Some(content) = &patch.content {
            task.content = content.clone();
        }
        if let Some(completion) = patch.completion {
            task.completed = completion.is_some();
            task.completed_at = completion;
        }
        Ok(task.clone())
    }

    async fn list_tasks_due_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id && t.due_at >= start && t.due_at <= end)
            .cloned()
            .collect())
    }

    async fn list_tasks_created_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.user_id == user_id && t.created_at >= start && t.created_at < end)
            .cloned()
            .collect())
    }

    async fn count_completions_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> PortResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .completed_tasks(user_id)
            .filter(|t| t.completed_at.is_some_and(|at| at >= since))
            .count() as i64)
    }

    async fn count_completed(&self, user_id: UserId) -> PortResult<i64> {
        self.trip("count_completed")?;
        Ok(self.state.lock().await.completed_tasks(user_id).count() as i64)
    }

    async fn count_completed_between(
        &self,
        user_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .completed_tasks(user_id)
            .filter(|t| t.completed_at.is_some_and(|at| at >= start && at < end))
            .count() as i64)
    }

    async fn completion_times(&self, user_id: UserId) -> PortResult<Vec<DateTime<Utc>>> {
        Ok(self.state.lock().await.completion_times(user_id))
    }

    async fn get_character_for_user(&self, user_id: UserId) -> PortResult<Option<Character>> {
        let state = self.state.lock().await;
        Ok(state
            .characters
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn list_characters(&self) -> PortResult<Vec<Character>> {
        let state = self.state.lock().await;
        let mut characters: Vec<_> = state.characters.values().cloned().collect();
        characters.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.character_id.cmp(&a.character_id))
        });
        Ok(characters)
    }

    async fn list_characters_by_standing(&self) -> PortResult<Vec<Character>> {
        let state = self.state.lock().await;
        let mut characters: Vec<_> = state.characters.values().cloned().collect();
        characters.sort_by(|a, b| {
            b.level
                .cmp(&a.level)
                .then(b.exp.cmp(&a.exp))
                .then(a.character_id.cmp(&b.character_id))
        });
        Ok(characters)
    }

    async fn list_level_requirements(&self) -> PortResult<Vec<(i32, i64)>> {
        let state = self.state.lock().await;
        Ok(state
            .level_requirements
            .iter()
            .map(|(level, req)| (*level, *req))
            .collect())
    }

    async fn list_exp_log(&self, user_id: UserId) -> PortResult<Vec<ExpLogEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .exp_log
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_achievements(&self) -> PortResult<Vec<Achievement>> {
        Ok(self.state.lock().await.achievements.values().cloned().collect())
    }

    async fn get_achievement(
        &self,
        achievement_id: AchievementId,
    ) -> PortResult<Option<Achievement>> {
        Ok(self
            .state
            .lock()
            .await
            .achievements
            .get(&achievement_id)
            .cloned())
    }

    async fn get_achievement_progress(
        &self,
        user_id: UserId,
        achievement_id: AchievementId,
    ) -> PortResult<Option<AchievementProgress>> {
        self.trip("get_achievement_progress")?;
        Ok(self
            .state
            .lock()
            .await
            .progress
            .get(&(user_id, achievement_id))
            .cloned())
    }

    async fn list_achievement_progress(
        &self,
        user_id: UserId,
    ) -> PortResult<Vec<AchievementProgress>> {
        let state = self.state.lock().await;
        Ok(state
            .progress
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn unlocked_user_counts(&self) -> PortResult<HashMap<AchievementId, i64>> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for progress in state.progress.values().filter(|p| p.is_unlocked) {
            *counts.entry(progress.achievement_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn get_ranking_entry(&self, user_id: UserId) -> PortResult<Option<RankingEntry>> {
        Ok(self.state.lock().await.ranking.get(&user_id).cloned())
    }

    async fn upsert_ranking_entry(&self, entry: &RankingEntry) -> PortResult<()> {
        self.trip("upsert_ranking_entry")?;
        self.state
            .lock()
            .await
            .ranking
            .insert(entry.user_id, entry.clone());
        Ok(())
    }

    async fn list_ranking(&self, limit: i64) -> PortResult<Vec<RankingEntry>> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.ranking.values().cloned().collect();
        rows.sort_by_key(|r| r.rank);
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}

//=========================================================================================
// `StoreTx` Trait Implementation
//=========================================================================================

/// An open transaction over a `MemoryStore`.
pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<Mutex<HashSet<&'static str>>>,
}

impl MemoryTx {
    fn trip(&self, operation: &'static str) -> PortResult<()> {
        trip(&self.faults, operation)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_task(&mut self, task_id: TaskId) -> PortResult<Option<Task>> {
        self.trip("lock_task")?;
        Ok(self.working.tasks.get(&task_id).cloned())
    }

    async fn complete_task(
        &mut self,
        task_id: TaskId,
        at: DateTime<Utc>,
        reward: Option<i32>,
    ) -> PortResult<Task> {
        self.trip("complete_task")?;
        let task = self.working.task_mut(task_id)?;
        task.completed = true;
        task.completed_at = Some(at);
        if let Some(reward) = reward {
            task.exp_given = true;
            task.exp_reward = reward;
        }
        Ok(task.clone())
    }

    async fn delete_task(&mut self, task_id: TaskId) -> PortResult<()> {
        self.trip("delete_task")?;
        self.working.tasks.remove(&task_id);
        Ok(())
    }

    async fn get_user(&mut self, user_id: UserId) -> PortResult<User> {
        self.trip("get_user")?;
        self.working.user(user_id)
    }

    async fn rename_user(&mut self, user_id: UserId, nickname: &str) -> PortResult<()> {
        self.trip("rename_user")?;
        if self.working.nickname_taken(nickname, Some(user_id)) {
            return Err(PortError::Conflict(format!("Nickname {} is taken", nickname)));
        }
        let row = self
            .working
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        let previous = std::mem::replace(&mut row.nickname, nickname.to_string());
        for character in self.working.characters.values_mut() {
            if character.user_id == user_id && character.character_name == previous {
                character.character_name = nickname.to_string();
            }
        }
        Ok(())
    }

    async fn completion_times(&mut self, user_id: UserId) -> PortResult<Vec<DateTime<Utc>>> {
        self.trip("completion_times")?;
        Ok(self.working.completion_times(user_id))
    }

    async fn save_streak(&mut self, profile: &Profile) -> PortResult<()> {
        self.trip("save_streak")?;
        self.working.profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn add_character_exp(
        &mut self,
        user_id: UserId,
        character_name: &str,
        delta: i64,
        at: DateTime<Utc>,
    ) -> PortResult<Character> {
        self.trip("add_character_exp")?;
        let existing = self
            .working
            .character_by_name(user_id, character_name)
            .map(|c| c.character_id);
        let character_id = match existing {
            Some(id) => id,
            None => {
                let id = self.working.next_id();
                self.working.characters.insert(
                    id,
                    Character {
                        character_id: id,
                        user_id,
                        character_name: character_name.to_string(),
                        exp: 0,
                        level: 1,
                        gold: 0,
                        created_at: at,
                    },
                );
                id
            }
        };
        let character = self
            .working
            .characters
            .get_mut(&character_id)
            .ok_or_else(|| PortError::Unexpected("character vanished".to_string()))?;
        character.exp += delta;
        Ok(character.clone())
    }

    async fn lock_character(
        &mut self,
        user_id: UserId,
        character_name: &str,
    ) -> PortResult<Option<Character>> {
        self.trip("lock_character")?;
        Ok(self.working.character_by_name(user_id, character_name).cloned())
    }

    async fn set_character_progress(
        &mut self,
        character_id: CharacterId,
        exp: i64,
        level: i32,
        _at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.trip("set_character_progress")?;
        let character = self
            .working
            .characters
            .get_mut(&character_id)
            .ok_or_else(|| PortError::NotFound(format!("Character {} not found", character_id)))?;
        character.exp = exp;
        character.level = level;
        Ok(())
    }

    async fn credit_character(
        &mut self,
        user_id: UserId,
        exp: i64,
        gold: i64,
        _at: DateTime<Utc>,
    ) -> PortResult<Option<Character>> {
        self.trip("credit_character")?;
        let character = self
            .working
            .characters
            .values_mut()
            .filter(|c| c.user_id == user_id)
            .min_by_key(|c| c.character_id);
        Ok(character.map(|c| {
            c.exp += exp;
            c.gold += gold;
            c.clone()
        }))
    }

    async fn insert_achievement_progress(
        &mut self,
        progress: &AchievementProgress,
    ) -> PortResult<bool> {
        self.trip("insert_achievement_progress")?;
        let key = (progress.user_id, progress.achievement_id);
        if self.working.progress.contains_key(&key) {
            return Ok(false);
        }
        self.working.progress.insert(key, progress.clone());
        Ok(true)
    }

    async fn append_exp_log(&mut self, entry: &ExpLogEntry) -> PortResult<()> {
        self.trip("append_exp_log")?;
        self.working.exp_log.push(entry.clone());
        Ok(())
    }

    async fn append_level_transition(&mut self, transition: &LevelTransition) -> PortResult<()> {
        self.trip("append_level_transition")?;
        self.working.level_log.push(transition.clone());
        Ok(())
    }

    async fn append_task_log(&mut self, entry: &TaskLogEntry) -> PortResult<()> {
        self.trip("append_task_log")?;
        self.working.task_log.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        self.trip("commit")?;
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
        nickname: &str,
    ) -> PortResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email.as_deref() == Some(email)) {
            return Err(PortError::Conflict(format!("Email {} is already registered", email)));
        }
        if state.nickname_taken(nickname, None) {
            return Err(PortError::Conflict(format!("Nickname {} is taken", nickname)));
        }
        let user_id = state.next_id();
        let row = UserRow {
            user_id,
            nickname: nickname.to_string(),
            email: Some(email.to_string()),
            hashed_password: Some(hashed_password.to_string()),
        };
        let user = row.to_domain();
        state.users.insert(user_id, row);
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let state = self.state.lock().await;
        state
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .and_then(|u| {
                Some(UserCredentials {
                    user_id: u.user_id,
                    email: u.email.clone()?,
                    nickname: u.nickname.clone(),
                    hashed_password: u.hashed_password.clone()?,
                })
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().await;
        state.user(user_id)?;
        state
            .sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> PortResult<User> {
        let state = self.state.lock().await;
        match state.sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > now => state.user(*user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.state.lock().await.sessions.remove(session_id);
        Ok(())
    }
}
