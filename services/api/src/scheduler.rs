//! services/api/src/scheduler.rs
//!
//! Periodic leaderboard rebuilds.

use quest_core::ports::{Clock, ProgressStore};
use quest_core::ranking::recompute_ranking;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Rebuilds the ranking snapshot every `every` until the token is cancelled.
///
/// The first rebuild runs immediately. A failed rebuild is logged and the
/// next tick tries again.
pub async fn run_ranking_scheduler(
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
    cancellation_token: CancellationToken,
) {
    info!("Ranking scheduler started (interval: {:?})", every);
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = recompute_ranking(store.as_ref(), clock.now()).await {
                    error!("Ranking rebuild failed: {}", e);
                }
            }
        }
    }
    info!("Ranking scheduler stopped");
}
