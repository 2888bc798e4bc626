//! crates/quest_core/src/ranking.rs
//!
//! Leaderboard snapshot rebuilds. Reads character standings without locking;
//! a rebuild racing live grants publishes a slightly stale board.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::domain::RankingEntry;
use crate::error::EngineResult;
use crate::ports::{PortError, ProgressStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankingSummary {
    pub ranked: usize,
    /// Rows whose level or experience moved since the previous rebuild.
    pub restamped: usize,
}

/// Rebuilds the snapshot from character state.
///
/// Order is level desc, experience desc, then character id asc. A user with
/// several characters is ranked by the best one. `calculated_at` is carried
/// over from the previous row unless level or experience changed.
pub async fn recompute_ranking(store: &dyn ProgressStore, now: DateTime<Utc>) -> EngineResult<RankingSummary> {
    let characters = store.list_characters_by_standing().await?;
    let mut seen = HashSet::new();
    let mut summary = RankingSummary::default();

    for character in characters {
        if !seen.insert(character.user_id) {
            continue;
        }
        let rank = i32::try_from(seen.len()).unwrap_or(i32::MAX);
        let nickname = match store.get_user(character.user_id).await {
            Ok(user) => Some(user.nickname),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let previous = store.get_ranking_entry(character.user_id).await?;
        let calculated_at = match previous {
            Some(prev) if prev.level == character.level && prev.total_exp == character.exp => {
                prev.calculated_at
            }
            _ => {
                summary.restamped += 1;
                now
            }
        };

        store
            .upsert_ranking_entry(&RankingEntry {
                user_id: character.user_id,
                rank,
                level: character.level,
                total_exp: character.exp,
                nickname,
                calculated_at,
            })
            .await?;
        debug!(user_id = character.user_id, rank, "Ranking row written");
        summary.ranked += 1;
    }

    info!(ranked = summary.ranked, restamped = summary.restamped, "Ranking recomputed");
    Ok(summary)
}

/// The top `limit` snapshot rows by rank.
pub async fn get_ranking(store: &dyn ProgressStore, limit: i64) -> EngineResult<Vec<RankingEntry>> {
    Ok(store.list_ranking(limit).await?)
}
