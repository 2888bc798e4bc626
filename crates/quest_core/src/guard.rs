//! crates/quest_core/src/guard.rs
//!
//! Rate heuristic applied before a completion is honored.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::domain::UserId;
use crate::error::{EngineError, EngineResult};
use crate::ports::ProgressStore;

/// How many completions a user may have inside the trailing window before
/// the next one is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub window: Duration,
    pub max_recent: i64,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            window: Duration::seconds(15),
            max_recent: 2,
        }
    }
}

/// Fails with `RateExceeded` when the user already has `max_recent` or more
/// completions within the window ending at `now`. Never mutates state.
pub async fn check_completion_rate(
    store: &dyn ProgressStore,
    policy: &RatePolicy,
    user_id: UserId,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let recent = store
        .count_completions_since(user_id, now - policy.window)
        .await?;
    if recent >= policy.max_recent {
        warn!(user_id, recent, "Completion rate exceeded, refusing completion");
        return Err(EngineError::RateExceeded {
            cheating_detected: true,
        });
    }
    Ok(())
}
