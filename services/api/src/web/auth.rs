//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, logout and the profile
//! of the signed-in user.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use quest_core::domain::{User, UserId};
use quest_core::ports::PortError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::middleware::session_id;
use crate::web::rest::{engine_error, error_response, internal_error, ErrorResponse, HandlerError};
use crate::web::state::AppState;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").expect("email pattern compiles")
});
static PASSWORD_CHARSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9!@#$%^&*]+$").expect("password pattern compiles"));
const PASSWORD_SYMBOLS: &str = "!@#$%^&*";

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: i64,
    pub nickname: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: i64,
    pub nickname: String,
    pub current_streak: i32,
    pub longest_streak: i32,
}

#[derive(Deserialize, ToSchema)]
pub struct EditMeRequest {
    pub nickname: String,
}

//=========================================================================================
// Validation
//=========================================================================================

fn validate_credentials(email: &str, password: &str) -> Result<(), HandlerError> {
    if !(6..=50).contains(&email.len()) || !EMAIL_RE.is_match(email) {
        return Err(error_response(StatusCode::BAD_REQUEST, "Email address is not valid"));
    }

    let strong = (8..=20).contains(&password.len())
        && PASSWORD_CHARSET_RE.is_match(password)
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SYMBOLS.contains(c));
    if !strong {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Password needs 8 to 20 characters with a letter, a digit and one of !@#$%^&*",
        ));
    }
    Ok(())
}

/// Opens a session for the user and builds its cookie.
async fn start_session(state: &AppState, user_id: UserId) -> Result<String, HandlerError> {
    let auth_session_id = Uuid::new_v4().to_string();
    let ttl = state.config.session_ttl();
    let expires_at = state.clock().now() + ttl;

    state
        .accounts
        .create_auth_session(&auth_session_id, user_id, expires_at)
        .await
        .map_err(|e| internal_error("Failed to create auth session", e))?;

    Ok(format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id,
        ttl.num_seconds()
    ))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid email or weak password", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    validate_credentials(&req.email, &req.password)?;

    // 1. Hash the password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| internal_error("Failed to hash password", e))?
        .to_string();

    // 2. Create the user with a generated nickname
    let nickname = format!("adventurer{}", &Uuid::new_v4().simple().to_string()[..8]);
    let user = state
        .accounts
        .create_user_with_email(&req.email, &password_hash, &nickname)
        .await
        .map_err(|e| match e {
            PortError::Conflict(message) => error_response(StatusCode::CONFLICT, message),
            other => internal_error("Failed to create user", other),
        })?;
    info!(user_id = user.user_id, "User signed up");

    // 3. Start a session
    let cookie = start_session(&state, user.user_id).await?;

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            user_id: user.user_id,
            nickname: user.nickname,
        }),
    ))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let invalid = || error_response(StatusCode::UNAUTHORIZED, "Invalid email or password");

    // 1. Get user by email
    let user_creds = state
        .accounts
        .get_user_by_email(&req.email)
        .await
        .map_err(|e| match e {
            PortError::NotFound(_) => invalid(),
            other => internal_error("Failed to get user", other),
        })?;

    // 2. Verify password
    let parsed_hash = PasswordHash::new(&user_creds.hashed_password)
        .map_err(|e| internal_error("Failed to parse password hash", e))?;
    let valid = Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_ok();
    if !valid {
        return Err(invalid());
    }

    // 3. Start a session
    let cookie = start_session(&state, user_creds.user_id).await?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            user_id: user_creds.user_id,
            nickname: user_creds.nickname,
        }),
    ))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session", body = ErrorResponse)
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let auth_session_id = session_id(&headers)
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "No session found"))?;

    state
        .accounts
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout")
        })?;

    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]))
}

/// GET /auth/me - The signed-in user with streak state
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<MeResponse>, HandlerError> {
    let profile = state.engine.profile(user.user_id).await.map_err(engine_error)?;
    Ok(Json(MeResponse {
        user_id: user.user_id,
        nickname: user.nickname,
        current_streak: profile.current_streak,
        longest_streak: profile.longest_streak,
    }))
}

/// PATCH /auth/me - Change the nickname (and the character's name with it)
#[utoipa::path(
    patch,
    path = "/auth/me",
    request_body = EditMeRequest,
    responses(
        (status = 200, description = "Nickname changed", body = AuthResponse),
        (status = 400, description = "Nickname must be 2 to 15 characters", body = ErrorResponse),
        (status = 409, description = "Nickname taken", body = ErrorResponse)
    )
)]
pub async fn edit_me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(req): Json<EditMeRequest>,
) -> Result<Json<AuthResponse>, HandlerError> {
    let renamed = state
        .engine
        .change_nickname(&user, &req.nickname)
        .await
        .map_err(engine_error)?;
    Ok(Json(AuthResponse {
        user_id: renamed.user_id,
        nickname: renamed.nickname,
    }))
}
