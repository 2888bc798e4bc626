pub mod achievements;
pub mod auth;
pub mod characters;
pub mod middleware;
pub mod rank;
pub mod rest;
pub mod state;
pub mod todos;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use middleware::require_auth;
pub use rest::ApiDoc;
use state::AppState;

/// Builds the complete application router: public auth routes, session-guarded
/// routes, CORS and the Swagger UI.
pub fn router(app_state: Arc<AppState>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);
    match app_state.config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => warn!(
            "CORS_ORIGIN '{}' is not a valid header value; cross-origin requests will be refused",
            app_state.config.cors_origin
        ),
    }

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/me", get(auth::me_handler).patch(auth::edit_me_handler))
        .route(
            "/todo",
            get(todos::list_todos_handler).post(todos::add_todo_handler),
        )
        .route("/todo/done/{id}", post(todos::complete_todo_handler))
        .route(
            "/todo/{id}",
            put(todos::edit_todo_handler).delete(todos::delete_todo_handler),
        )
        .route("/achievements", get(achievements::list_achievements_handler))
        .route("/achievements/user", get(achievements::user_achievements_handler))
        .route(
            "/achievements/unlock/{id}",
            post(achievements::unlock_achievement_handler),
        )
        .route("/rank", get(rank::ranking_handler))
        .route("/characters", get(characters::list_characters_handler))
        .route("/characters/me", get(characters::my_character_handler))
        .route("/ledger/exp", get(characters::exp_ledger_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
