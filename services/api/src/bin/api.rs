//! services/api/src/bin/api.rs

use api_lib::{
    adapters::db::DbAdapter,
    config::{Config, StoreBackend},
    error::ApiError,
    scheduler::run_ranking_scheduler,
    web::{router, state::AppState},
};
use quest_core::{
    calendar::SystemClock,
    events::{run_achievement_worker, ChannelEventSink},
    levels::LevelTable,
    memory::MemoryStore,
    ports::{AccountStore, Clock, ProgressStore},
    progression::ProgressionEngine,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Store & Run Migrations ---
    let (store, accounts): (Arc<dyn ProgressStore>, Arc<dyn AccountStore>) =
        match config.store_backend {
            StoreBackend::Postgres => {
                let database_url = config.database_url.as_deref().ok_or_else(|| {
                    ApiError::Internal("DATABASE_URL is required for the postgres store".to_string())
                })?;
                info!("Connecting to database...");
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;
                let db_adapter = Arc::new(DbAdapter::new(db_pool));
                info!("Running database migrations...");
                db_adapter.run_migrations().await?;
                info!("Database migrations complete.");
                (db_adapter.clone() as Arc<dyn ProgressStore>, db_adapter as Arc<dyn AccountStore>)
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store; all state is lost on shutdown");
                let memory = Arc::new(MemoryStore::new());
                (memory.clone() as Arc<dyn ProgressStore>, memory as Arc<dyn AccountStore>)
            }
        };

    // --- 3. Load the Level Table ---
    let levels = LevelTable::from_rows(store.list_level_requirements().await?);
    let levels = if levels.is_empty() {
        warn!("No level requirements stored; falling back to the standard table");
        LevelTable::standard()
    } else {
        levels
    };

    // --- 4. Build the Engine & Shared AppState ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let settings = config.engine_settings();
    let calendar = settings.calendar;
    let (event_sink, events) = ChannelEventSink::new();
    let engine = Arc::new(ProgressionEngine::new(
        store.clone(),
        clock.clone(),
        Arc::new(levels),
        Arc::new(event_sink),
        settings,
    ));
    let app_state = Arc::new(AppState {
        engine,
        accounts,
        config: config.clone(),
    });

    // --- 5. Spawn Background Tasks ---
    let cancellation_token = CancellationToken::new();
    tokio::spawn(run_achievement_worker(
        events,
        store.clone(),
        clock.clone(),
        calendar,
    ));
    if config.ranking_interval_secs > 0 {
        tokio::spawn(run_ranking_scheduler(
            store,
            clock,
            Duration::from_secs(config.ranking_interval_secs),
            cancellation_token.clone(),
        ));
    } else {
        info!("Ranking scheduler disabled");
    }

    // --- 6. Start the Server ---
    let app = router(app_state);
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            cancellation_token.cancel();
        })
        .await?;

    Ok(())
}
