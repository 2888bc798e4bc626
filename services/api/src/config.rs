//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::{Duration, FixedOffset};
use quest_core::calendar::Calendar;
use quest_core::guard::RatePolicy;
use quest_core::progression::EngineSettings;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which store adapter backs the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local; state is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("'{}' is not one of postgres, memory", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub log_level: Level,
    pub day_boundary_offset: FixedOffset,
    pub completion_reward_exp: i32,
    pub rate_window_secs: i64,
    pub rate_max_recent: i64,
    /// Zero disables the ranking scheduler.
    pub ranking_interval_secs: u64,
    pub ranking_limit: i64,
    pub session_ttl_days: i64,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Store Settings ---
        let bind_address = parse_var("BIND_ADDRESS", "0.0.0.0:4000")?;
        let store_backend: StoreBackend = parse_var("STORE_BACKEND", "postgres")?;

        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Engine Settings ---
        let offset_str = std::env::var("DAY_BOUNDARY_OFFSET").unwrap_or_else(|_| "Z".to_string());
        let day_boundary_offset = Calendar::parse_offset(&offset_str).ok_or_else(|| {
            ConfigError::InvalidValue(
                "DAY_BOUNDARY_OFFSET".to_string(),
                format!("'{}' is not a UTC offset like +09:00", offset_str),
            )
        })?;

        let completion_reward_exp = parse_var("COMPLETION_REWARD_EXP", "100")?;
        let rate_window_secs = parse_var("RATE_WINDOW_SECS", "15")?;
        let rate_max_recent = parse_var("RATE_MAX_RECENT", "2")?;

        // --- Load Scheduler & Session Settings ---
        let ranking_interval_secs = parse_var("RANKING_INTERVAL_SECS", "600")?;
        let ranking_limit = parse_var("RANKING_LIMIT", "100")?;
        let session_ttl_days = parse_var("SESSION_TTL_DAYS", "30")?;
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            day_boundary_offset,
            completion_reward_exp,
            rate_window_secs,
            rate_max_recent,
            ranking_interval_secs,
            ranking_limit,
            session_ttl_days,
            cors_origin,
        })
    }

    /// The engine knobs derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            completion_reward: self.completion_reward_exp,
            rate: RatePolicy {
                window: Duration::seconds(self.rate_window_secs),
                max_recent: self.rate_max_recent,
            },
            calendar: Calendar::new(self.day_boundary_offset),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::days(self.session_ttl_days)
    }
}

/// Reads `name`, falling back to `default`, and parses it.
fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}
