//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use quest_core::calendar::Calendar;
use quest_core::ports::{AccountStore, Clock, ProgressStore};
use quest_core::progression::ProgressionEngine;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProgressionEngine>,
    pub accounts: Arc<dyn AccountStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn store(&self) -> &dyn ProgressStore {
        self.engine.store().as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.engine.clock().as_ref()
    }

    pub fn calendar(&self) -> &Calendar {
        &self.engine.settings().calendar
    }
}
