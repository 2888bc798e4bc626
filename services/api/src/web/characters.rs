//! services/api/src/web/characters.rs
//!
//! Character views and the caller's experience ledger.

use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use quest_core::domain::{Character, ExpSource, User};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::web::rest::{engine_error, ErrorResponse, HandlerError};
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CharacterResponse {
    pub character_id: i64,
    pub user_id: i64,
    pub character_name: String,
    pub exp: i64,
    pub level: i32,
    pub gold: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Character> for CharacterResponse {
    fn from(c: Character) -> Self {
        Self {
            character_id: c.character_id,
            user_id: c.user_id,
            character_name: c.character_name,
            exp: c.exp,
            level: c.level,
            gold: c.gold,
            created_at: c.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MyCharacterResponse {
    #[serde(flatten)]
    pub character: CharacterResponse,
    pub next_level_exp: i64,
    pub remaining_exp: i64,
    pub image_url: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExpLogResponse {
    pub character_id: i64,
    pub todo_id: Option<i64>,
    pub achievement_id: Option<i32>,
    pub exp: i64,
    pub created_at: DateTime<Utc>,
}

/// GET /characters - Every character, newest first
#[utoipa::path(
    get,
    path = "/characters",
    responses(
        (status = 200, description = "All characters", body = [CharacterResponse])
    )
)]
pub async fn list_characters_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CharacterResponse>>, HandlerError> {
    let characters = state.engine.all_characters().await.map_err(engine_error)?;
    Ok(Json(characters.into_iter().map(CharacterResponse::from).collect()))
}

/// GET /characters/me - The caller's character and its distance to the next level
#[utoipa::path(
    get,
    path = "/characters/me",
    responses(
        (status = 200, description = "The caller's character", body = MyCharacterResponse),
        (status = 404, description = "No character yet", body = ErrorResponse)
    )
)]
pub async fn my_character_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<MyCharacterResponse>, HandlerError> {
    let view = state.engine.my_character(&user).await.map_err(engine_error)?;
    Ok(Json(MyCharacterResponse {
        character: CharacterResponse::from(view.character),
        next_level_exp: view.next_level_exp,
        remaining_exp: view.remaining_exp,
        image_url: view.image_url.to_string(),
    }))
}

/// GET /ledger/exp - The caller's experience grants and revocations, newest first
#[utoipa::path(
    get,
    path = "/ledger/exp",
    responses(
        (status = 200, description = "Experience ledger", body = [ExpLogResponse])
    )
)]
pub async fn exp_ledger_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<ExpLogResponse>>, HandlerError> {
    let entries = state.engine.exp_ledger(&user).await.map_err(engine_error)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| {
                let (todo_id, achievement_id) = match entry.source {
                    ExpSource::Task(task_id) => (Some(task_id), None),
                    ExpSource::Achievement(id) => (None, Some(id)),
                };
                ExpLogResponse {
                    character_id: entry.character_id,
                    todo_id,
                    achievement_id,
                    exp: entry.exp,
                    created_at: entry.created_at,
                }
            })
            .collect(),
    ))
}
