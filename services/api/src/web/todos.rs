//! services/api/src/web/todos.rs
//!
//! Task endpoints. Completion and deletion are where experience moves.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use quest_core::domain::{Task, TaskEdit, User};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::web::rest::{engine_error, ErrorResponse, HandlerError};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, IntoParams)]
pub struct MonthQuery {
    pub year: i32,
    /// 1 to 12.
    pub month: u32,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddTodoRequest {
    pub content: String,
    /// Defaults to now.
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema)]
pub struct EditTodoRequest {
    pub content: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TodoResponse {
    pub todo_id: i64,
    pub content: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub exp_given: bool,
    pub exp_reward: i32,
}

impl From<Task> for TodoResponse {
    fn from(task: Task) -> Self {
        Self {
            todo_id: task.task_id,
            content: task.content,
            completed: task.completed,
            completed_at: task.completed_at,
            due_at: task.due_at,
            created_at: task.created_at,
            exp_given: task.exp_given,
            exp_reward: task.exp_reward,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct CompletionResponse {
    pub exp: i32,
    pub exp_given: bool,
    #[serde(rename = "leveledUp")]
    pub leveled_up: bool,
}

#[derive(Serialize, ToSchema)]
pub struct DeletionResponse {
    pub message: String,
    #[serde(rename = "leveledDown")]
    pub leveled_down: bool,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /todo - Tasks due in the given UTC month
#[utoipa::path(
    get,
    path = "/todo",
    params(MonthQuery),
    responses(
        (status = 200, description = "Tasks due in the month", body = [TodoResponse]),
        (status = 400, description = "Invalid month", body = ErrorResponse)
    )
)]
pub async fn list_todos_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(query): Query<MonthQuery>,
) -> Result<Json<Vec<TodoResponse>>, HandlerError> {
    let tasks = state
        .engine
        .get_tasks(&user, query.year, query.month)
        .await
        .map_err(engine_error)?;
    Ok(Json(tasks.into_iter().map(TodoResponse::from).collect()))
}

/// POST /todo - Create a task
#[utoipa::path(
    post,
    path = "/todo",
    request_body = AddTodoRequest,
    responses(
        (status = 201, description = "Task created", body = TodoResponse),
        (status = 400, description = "Empty content", body = ErrorResponse)
    )
)]
pub async fn add_todo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<AddTodoRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let task = state
        .engine
        .add_task(&user, &req.content, req.due_at)
        .await
        .map_err(engine_error)?;
    Ok((StatusCode::CREATED, Json(TodoResponse::from(task))))
}

/// POST /todo/done/{id} - Complete a task and collect its experience
#[utoipa::path(
    post,
    path = "/todo/done/{id}",
    params(("id" = i64, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task completed", body = CompletionResponse),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "No such task", body = ErrorResponse),
        (status = 409, description = "Task flags are inconsistent", body = ErrorResponse),
        (status = 429, description = "Too many completions in a short time", body = ErrorResponse)
    )
)]
pub async fn complete_todo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<CompletionResponse>, HandlerError> {
    let outcome = state
        .engine
        .complete_owned_task(id, &user)
        .await
        .map_err(engine_error)?;
    Ok(Json(CompletionResponse {
        exp: outcome.exp,
        exp_given: outcome.exp_given,
        leveled_up: outcome.leveled_up,
    }))
}

/// PUT /todo/{id} - Edit content or completion without moving experience
#[utoipa::path(
    put,
    path = "/todo/{id}",
    params(("id" = i64, Path, description = "Task id")),
    request_body = EditTodoRequest,
    responses(
        (status = 200, description = "Task updated", body = TodoResponse),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "No such task", body = ErrorResponse)
    )
)]
pub async fn edit_todo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(req): Json<EditTodoRequest>,
) -> Result<Json<TodoResponse>, HandlerError> {
    let edit = TaskEdit {
        content: req.content,
        completed: req.completed,
    };
    let task = state
        .engine
        .edit_task(id, &user, edit)
        .await
        .map_err(engine_error)?;
    Ok(Json(TodoResponse::from(task)))
}

/// DELETE /todo/{id} - Delete a task, taking back its experience
#[utoipa::path(
    delete,
    path = "/todo/{id}",
    params(("id" = i64, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task deleted, or already gone", body = DeletionResponse),
        (status = 403, description = "Not the owner", body = ErrorResponse)
    )
)]
pub async fn delete_todo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<DeletionResponse>, HandlerError> {
    let outcome = state
        .engine
        .delete_task(id, &user)
        .await
        .map_err(engine_error)?;
    Ok(Json(DeletionResponse {
        message: outcome.message,
        leveled_down: outcome.leveled_down,
    }))
}
