//! crates/quest_core/src/events.rs
//!
//! Completion events and the background worker that re-checks achievements
//! after each one.

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::achievements::evaluate_all;
use crate::calendar::Calendar;
use crate::domain::CompletionEvent;
use crate::ports::{Clock, CompletionEventSink, ProgressStore};

/// Forwards completion events onto an unbounded channel.
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: UnboundedSender<CompletionEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, UnboundedReceiver<CompletionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CompletionEventSink for ChannelEventSink {
    fn publish(&self, event: CompletionEvent) {
        if self.tx.send(event).is_err() {
            warn!(user_id = event.user_id, task_id = event.task_id, "Achievement worker is gone, dropping event");
        }
    }
}

/// Discards every event.
pub struct NoopEventSink;

impl CompletionEventSink for NoopEventSink {
    fn publish(&self, _event: CompletionEvent) {}
}

/// Drains completion events until every sender is dropped, running the
/// achievement batch for each event's user.
pub async fn run_achievement_worker(
    mut rx: UnboundedReceiver<CompletionEvent>,
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
) {
    info!("Achievement worker started");
    while let Some(event) = rx.recv().await {
        let report = evaluate_all(store.as_ref(), &calendar, clock.now(), event.user_id).await;
        debug!(
            user_id = event.user_id,
            task_id = event.task_id,
            unlocked = ?report.unlocked,
            failed = report.failed.len(),
            "Achievements re-checked"
        );
    }
    info!("Achievement worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ManualClock;
    use crate::domain::Task;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn worker_unlocks_after_event() {
        let now = "2024-05-21T10:00:00Z".parse().unwrap();
        let store = MemoryStore::new();
        let user = store.add_user("ada").await;
        store.put_character(user.user_id, "ada", 0, 1).await;
        let task = store
            .put_task(Task {
                task_id: 0,
                user_id: user.user_id,
                content: "ship it".to_string(),
                completed: true,
                completed_at: Some(now),
                due_at: now,
                created_at: now,
                exp_given: true,
                exp_reward: 100,
            })
            .await;

        let (sink, rx) = ChannelEventSink::new();
        let worker = tokio::spawn(run_achievement_worker(
            rx,
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(now)),
            Calendar::utc(),
        ));
        sink.publish(CompletionEvent {
            user_id: user.user_id,
            task_id: task.task_id,
        });
        drop(sink);
        worker.await.unwrap();

        let progress = store.get_achievement_progress(user.user_id, 1).await.unwrap();
        assert!(progress.is_some_and(|p| p.is_unlocked));
    }
}
