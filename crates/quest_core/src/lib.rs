pub mod achievements;
pub mod calendar;
pub mod domain;
pub mod error;
pub mod events;
pub mod guard;
pub mod levels;
pub mod memory;
pub mod ports;
pub mod progression;
pub mod ranking;
pub mod streak;

pub use calendar::{Calendar, ManualClock, SystemClock};
pub use domain::{
    Achievement, AchievementId, AchievementProgress, Character, CompletionEvent, ExpLogEntry,
    ExpSource, Profile, RankingEntry, Task, TaskEdit, TaskId, User, UserCredentials, UserId,
};
pub use error::{EngineError, EngineResult};
pub use levels::LevelTable;
pub use memory::MemoryStore;
pub use ports::{
    AccountStore, Clock, CompletionEventSink, PortError, PortResult, ProgressStore, StoreTx,
};
pub use progression::{
    CharacterView, CompletionOutcome, DeletionOutcome, EngineSettings, ProgressionEngine,
};
