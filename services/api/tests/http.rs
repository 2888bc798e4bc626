//! services/api/tests/http.rs
//!
//! Drives the full router over the in-memory store.

use api_lib::config::{Config, StoreBackend};
use api_lib::web::{router, state::AppState};
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, FixedOffset};
use http_body_util::BodyExt;
use quest_core::calendar::ManualClock;
use quest_core::events::NoopEventSink;
use quest_core::levels::LevelTable;
use quest_core::memory::MemoryStore;
use quest_core::progression::ProgressionEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        store_backend: StoreBackend::Memory,
        database_url: None,
        log_level: tracing::Level::INFO,
        day_boundary_offset: FixedOffset::east_opt(0).unwrap(),
        completion_reward_exp: 100,
        rate_window_secs: 15,
        rate_max_recent: 2,
        ranking_interval_secs: 0,
        ranking_limit: 100,
        session_ttl_days: 30,
        cors_origin: "http://localhost:3000".to_string(),
    }
}

fn test_app() -> TestApp {
    let config = Arc::new(test_config());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new("2024-05-21T10:00:00Z".parse().unwrap()));
    let engine = Arc::new(ProgressionEngine::new(
        store.clone(),
        clock.clone(),
        Arc::new(LevelTable::standard()),
        Arc::new(NoopEventSink),
        config.engine_settings(),
    ));
    let state = Arc::new(AppState {
        engine,
        accounts: store,
        config,
    });
    TestApp {
        router: router(state),
        clock,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Option<String>, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, set_cookie, json)
    }

    /// Signs up and returns the `session=...` cookie pair.
    async fn signup(&self, email: &str) -> String {
        let (status, cookie, body) = self
            .send(
                "POST",
                "/auth/signup",
                None,
                Some(json!({ "email": email, "password": "abc123!@" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        cookie.expect("signup sets a session cookie")
    }

    async fn add_todo(&self, cookie: &str, content: &str) -> i64 {
        let (status, _, body) = self
            .send("POST", "/todo", Some(cookie), Some(json!({ "content": content })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["todoId"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn signup_starts_a_session_and_me_reports_it() {
    let app = test_app();
    let cookie = app.signup("ada@example.com").await;
    assert!(cookie.starts_with("session="));

    let (status, _, body) = app.send("GET", "/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["nickname"].as_str().unwrap().starts_with("adventurer"));
    assert_eq!(body["currentStreak"], 0);
}

#[tokio::test]
async fn duplicate_signup_and_bad_login_are_refused() {
    let app = test_app();
    app.signup("ada@example.com").await;

    let (status, _, _) = app
        .send(
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "email": "ada@example.com", "password": "abc123!@" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = app
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "wrong123!@" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, cookie, _) = app
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "abc123!@" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(cookie.is_some());
}

#[tokio::test]
async fn protected_routes_need_a_live_session() {
    let app = test_app();
    let (status, _, _) = app.send("GET", "/todo?year=2024&month=5", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app
        .send("GET", "/rank", Some("session=not-a-session"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let cookie = app.signup("ada@example.com").await;
    app.clock.advance(Duration::days(31));
    let (status, _, _) = app.send("GET", "/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn completing_a_todo_pays_once_and_levels_up() {
    let app = test_app();
    let cookie = app.signup("ada@example.com").await;
    let todo_id = app.add_todo(&cookie, "write the report").await;

    let uri = format!("/todo/done/{}", todo_id);
    let (status, _, body) = app.send("POST", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exp"], 100);
    assert_eq!(body["exp_given"], true);
    assert_eq!(body["leveledUp"], true);

    app.clock.advance(Duration::seconds(60));
    let (status, _, body) = app.send("POST", &uri, Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["leveledUp"], false);

    let (status, _, body) = app.send("GET", "/characters/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], 2);
    assert_eq!(body["exp"], 0);
    assert_eq!(body["nextLevelExp"], 200);

    let (_, _, body) = app.send("GET", "/ledger/exp", Some(&cookie), None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, _, body) = app
        .send("GET", "/todo?year=2024&month=5", Some(&cookie), None)
        .await;
    assert_eq!(body[0]["completed"], true);
    assert_eq!(body[0]["expGiven"], true);
}

#[tokio::test]
async fn characters_are_listed_newest_first() {
    let app = test_app();
    let ada = app.signup("ada@example.com").await;
    let bob = app.signup("bob@example.com").await;
    let (_, _, ada_me) = app.send("GET", "/auth/me", Some(&ada), None).await;
    let (_, _, bob_me) = app.send("GET", "/auth/me", Some(&bob), None).await;

    let (status, _, body) = app.send("GET", "/characters", Some(&ada), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let ada_todo = app.add_todo(&ada, "first").await;
    app.send("POST", &format!("/todo/done/{}", ada_todo), Some(&ada), None)
        .await;
    app.clock.advance(Duration::minutes(5));
    let bob_todo = app.add_todo(&bob, "second").await;
    app.send("POST", &format!("/todo/done/{}", bob_todo), Some(&bob), None)
        .await;

    let (status, _, body) = app.send("GET", "/characters", Some(&ada), None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["userId"], bob_me["userId"]);
    assert_eq!(rows[1]["userId"], ada_me["userId"]);
    assert_eq!(rows[0]["characterName"], bob_me["nickname"]);
    assert!(rows[0]["createdAt"].as_str() > rows[1]["createdAt"].as_str());
}

#[tokio::test]
async fn rapid_completions_trip_the_rate_guard() {
    let app = test_app();
    let cookie = app.signup("ada@example.com").await;
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(app.add_todo(&cookie, &format!("quest {}", n)).await);
    }

    for id in &ids[..2] {
        let (status, _, _) = app
            .send("POST", &format!("/todo/done/{}", id), Some(&cookie), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        app.clock.advance(Duration::seconds(1));
    }
    let (status, _, body) = app
        .send("POST", &format!("/todo/done/{}", ids[2]), Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["cheatingDetected"], true);

    app.clock.advance(Duration::seconds(15));
    let (status, _, _) = app
        .send("POST", &format!("/todo/done/{}", ids[2]), Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleting_takes_experience_back_and_guards_ownership() {
    let app = test_app();
    let ada = app.signup("ada@example.com").await;
    let bob = app.signup("bob@example.com").await;
    let todo_id = app.add_todo(&ada, "slay the dragon").await;
    let uri = format!("/todo/{}", todo_id);

    app.send("POST", &format!("/todo/done/{}", todo_id), Some(&ada), None)
        .await;

    let (status, _, _) = app.send("DELETE", &uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = app
        .send("POST", &format!("/todo/done/{}", todo_id), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = app.send("DELETE", &uri, Some(&ada), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Task deleted");
    assert_eq!(body["leveledDown"], true);

    let (_, _, body) = app.send("GET", "/characters/me", Some(&ada), None).await;
    assert_eq!(body["level"], 1);
    assert_eq!(body["exp"], 0);

    let (status, _, body) = app.send("DELETE", &uri, Some(&ada), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Task already deleted");
}

#[tokio::test]
async fn achievements_list_and_unlock() {
    let app = test_app();
    let cookie = app.signup("ada@example.com").await;

    let (status, _, body) = app.send("GET", "/achievements", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 10);

    let (status, _, body) = app
        .send("POST", "/achievements/unlock/1", Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unlocked"], false);
    assert_eq!(body["message"], "Condition not met");

    let todo_id = app.add_todo(&cookie, "first step").await;
    app.send("POST", &format!("/todo/done/{}", todo_id), Some(&cookie), None)
        .await;

    let (_, _, body) = app
        .send("POST", "/achievements/unlock/1", Some(&cookie), None)
        .await;
    assert_eq!(body["unlocked"], true);
    assert_eq!(body["reward"]["xp"], 50);

    let (_, _, body) = app
        .send("POST", "/achievements/unlock/1", Some(&cookie), None)
        .await;
    assert_eq!(body["message"], "Achievement already unlocked");
    assert!(body.get("reward").map_or(true, Value::is_null));

    let (_, _, body) = app.send("GET", "/achievements/user", Some(&cookie), None).await;
    assert_eq!(body[0]["achievementId"], 1);

    let (status, _, _) = app
        .send("POST", "/achievements/unlock/99", Some(&cookie), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nickname_changes_are_validated_and_unique() {
    let app = test_app();
    let ada = app.signup("ada@example.com").await;
    let bob = app.signup("bob@example.com").await;

    let (status, _, body) = app
        .send("PATCH", "/auth/me", Some(&ada), Some(json!({ "nickname": "  ada  " })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nickname"], "ada");

    let (status, _, _) = app
        .send("PATCH", "/auth/me", Some(&bob), Some(json!({ "nickname": "ada" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = app
        .send("PATCH", "/auth/me", Some(&bob), Some(json!({ "nickname": "b" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = test_app();
    let cookie = app.signup("ada@example.com").await;

    let (status, cleared, _) = app.send("POST", "/auth/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared.as_deref(), Some("session="));

    let (status, _, _) = app.send("GET", "/auth/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
