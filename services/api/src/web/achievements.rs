//! services/api/src/web/achievements.rs
//!
//! Achievement catalog, per-user unlocks and the manual unlock endpoint.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use quest_core::achievements::{
    all_achievements, unlock_achievement, user_achievements, AchievementStatus, UnlockOutcome,
    UnlockedAchievement,
};
use quest_core::domain::{Achievement, User};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::web::rest::{engine_error, ErrorResponse, HandlerError};
use crate::web::state::AppState;

//=========================================================================================
// Response Types
//=========================================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AchievementResponse {
    pub achievement_id: i32,
    pub title: String,
    pub description: String,
    pub max_progress: i32,
    pub reward_xp: i32,
    pub reward_gold: i32,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub progress: i32,
    pub unlocked_user_count: i64,
}

impl AchievementResponse {
    fn new(
        achievement: Achievement,
        is_unlocked: bool,
        unlocked_at: Option<DateTime<Utc>>,
        progress: i32,
        unlocked_user_count: i64,
    ) -> Self {
        Self {
            achievement_id: achievement.achievement_id,
            title: achievement.title,
            description: achievement.description,
            max_progress: achievement.max_progress,
            reward_xp: achievement.reward_xp,
            reward_gold: achievement.reward_gold,
            is_unlocked,
            unlocked_at,
            progress,
            unlocked_user_count,
        }
    }
}

impl From<AchievementStatus> for AchievementResponse {
    fn from(status: AchievementStatus) -> Self {
        Self::new(
            status.achievement,
            status.is_unlocked,
            status.unlocked_at,
            status.progress,
            status.unlocked_user_count,
        )
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserAchievementResponse {
    pub achievement_id: i32,
    pub title: String,
    pub description: String,
    pub progress: i32,
    pub max_progress: i32,
    pub unlocked_at: Option<DateTime<Utc>>,
}

impl From<UnlockedAchievement> for UserAchievementResponse {
    fn from(unlocked: UnlockedAchievement) -> Self {
        Self {
            achievement_id: unlocked.achievement.achievement_id,
            title: unlocked.achievement.title,
            description: unlocked.achievement.description,
            progress: unlocked.progress.progress,
            max_progress: unlocked.achievement.max_progress,
            unlocked_at: unlocked.progress.unlocked_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct RewardResponse {
    pub xp: i32,
    pub gold: i32,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResponse {
    pub unlocked: bool,
    pub message: String,
    pub unlocked_at: Option<DateTime<Utc>>,
    /// Only set when this call paid the reward.
    pub reward: Option<RewardResponse>,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /achievements - The catalog with the caller's unlock state
#[utoipa::path(
    get,
    path = "/achievements",
    responses(
        (status = 200, description = "All achievements", body = [AchievementResponse])
    )
)]
pub async fn list_achievements_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<AchievementResponse>>, HandlerError> {
    let all = all_achievements(state.store(), user.user_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(all.into_iter().map(AchievementResponse::from).collect()))
}

/// GET /achievements/user - Achievements the caller has unlocked, newest first
#[utoipa::path(
    get,
    path = "/achievements/user",
    responses(
        (status = 200, description = "Unlocked achievements", body = [UserAchievementResponse])
    )
)]
pub async fn user_achievements_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<UserAchievementResponse>>, HandlerError> {
    let unlocked = user_achievements(state.store(), user.user_id)
        .await
        .map_err(engine_error)?;
    Ok(Json(unlocked.into_iter().map(UserAchievementResponse::from).collect()))
}

/// POST /achievements/unlock/{id} - Unlock an achievement if its condition holds
#[utoipa::path(
    post,
    path = "/achievements/unlock/{id}",
    params(("id" = i32, Path, description = "Achievement id")),
    responses(
        (status = 200, description = "Unlock result, including condition not met", body = UnlockResponse),
        (status = 404, description = "Unknown achievement or no character yet", body = ErrorResponse)
    )
)]
pub async fn unlock_achievement_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i32>,
) -> Result<Json<UnlockResponse>, HandlerError> {
    let outcome = unlock_achievement(
        state.store(),
        state.calendar(),
        state.clock().now(),
        user.user_id,
        id,
    )
    .await
    .map_err(engine_error)?;

    let response = match outcome {
        UnlockOutcome::Unlocked { progress, reward } => UnlockResponse {
            unlocked: true,
            message: "Achievement unlocked".to_string(),
            unlocked_at: progress.unlocked_at,
            reward: Some(RewardResponse {
                xp: reward.xp,
                gold: reward.gold,
            }),
        },
        UnlockOutcome::AlreadyUnlocked(progress) => UnlockResponse {
            unlocked: progress.is_unlocked,
            message: "Achievement already unlocked".to_string(),
            unlocked_at: progress.unlocked_at,
            reward: None,
        },
        UnlockOutcome::ConditionNotMet => UnlockResponse {
            unlocked: false,
            message: "Condition not met".to_string(),
            unlocked_at: None,
            reward: None,
        },
    };
    Ok(Json(response))
}
