//! services/api/src/web/rest.rs
//!
//! Contains the master definition for the OpenAPI specification and the
//! mapping from engine errors to HTTP responses shared by every handler.

use axum::{http::StatusCode, Json};
use quest_core::error::EngineError;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};

use crate::web::{achievements, auth, characters, rank, todos};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        auth::edit_me_handler,
        todos::list_todos_handler,
        todos::add_todo_handler,
        todos::complete_todo_handler,
        todos::edit_todo_handler,
        todos::delete_todo_handler,
        achievements::list_achievements_handler,
        achievements::user_achievements_handler,
        achievements::unlock_achievement_handler,
        rank::ranking_handler,
        characters::list_characters_handler,
        characters::my_character_handler,
        characters::exp_ledger_handler,
    ),
    components(
        schemas(ErrorResponse)
    ),
    tags(
        (name = "Todo Quest API", description = "Todo tracking with experience, levels, streaks and achievements.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Responses
//=========================================================================================

/// The JSON body of every failed request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
    /// Present only when the completion rate guard tripped.
    #[serde(rename = "cheatingDetected", skip_serializing_if = "Option::is_none")]
    pub cheating_detected: Option<bool>,
}

/// What handlers return on failure.
pub type HandlerError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
            cheating_detected: None,
        }),
    )
}

/// Maps an engine failure to its HTTP status. Store failures are logged with
/// their cause and reported as a bare 500.
pub fn engine_error(e: EngineError) -> HandlerError {
    match e {
        EngineError::NotFound(message) => error_response(StatusCode::NOT_FOUND, message),
        EngineError::CharacterNotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        EngineError::Forbidden(message) => error_response(StatusCode::FORBIDDEN, message),
        EngineError::RateExceeded { cheating_detected } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                message: "Too many completions in a short time".to_string(),
                cheating_detected: Some(cheating_detected),
            }),
        ),
        EngineError::Conflict(message) => error_response(StatusCode::CONFLICT, message),
        EngineError::InconsistentState { .. } => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        EngineError::Invalid(message) => error_response(StatusCode::BAD_REQUEST, message),
        EngineError::Unauthorized => error_response(StatusCode::UNAUTHORIZED, "Unauthorized"),
        EngineError::OperationFailed(cause) => {
            error!("Operation failed: {:?}", cause);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Logs and maps a failure in a handler's own (non-engine) step.
pub fn internal_error(context: &str, e: impl std::fmt::Debug) -> HandlerError {
    warn!("{}: {:?}", context, e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quest_core::ports::PortError;

    #[test]
    fn rate_trips_carry_the_flag() {
        let (status, Json(body)) = engine_error(EngineError::RateExceeded {
            cheating_detected: true,
        });
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["cheatingDetected"], true);
    }

    #[test]
    fn store_failures_hide_their_cause() {
        let (status, Json(body)) = engine_error(EngineError::OperationFailed(PortError::Unexpected(
            "connection reset".to_string(),
        )));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.message.contains("connection"));
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("cheatingDetected").is_none());
    }
}
