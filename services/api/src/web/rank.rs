//! services/api/src/web/rank.rs

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use quest_core::ranking::get_ranking;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::web::rest::{engine_error, HandlerError};
use crate::web::state::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RankResponse {
    pub rank: i32,
    pub user_id: i64,
    pub nickname: Option<String>,
    pub level: i32,
    pub total_exp: i64,
    pub calculated_at: DateTime<Utc>,
}

/// GET /rank - The latest leaderboard snapshot, top rows by rank
#[utoipa::path(
    get,
    path = "/rank",
    responses(
        (status = 200, description = "Leaderboard", body = [RankResponse])
    )
)]
pub async fn ranking_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RankResponse>>, HandlerError> {
    let rows = get_ranking(state.store(), state.config.ranking_limit)
        .await
        .map_err(engine_error)?;
    Ok(Json(
        rows.into_iter()
            .map(|row| RankResponse {
                rank: row.rank,
                user_id: row.user_id,
                nickname: row.nickname,
                level: row.level,
                total_exp: row.total_exp,
                calculated_at: row.calculated_at,
            })
            .collect(),
    ))
}
