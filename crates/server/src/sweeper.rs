use std::sync::Arc;
use std::time::Duration;

use tally_core::flows::{ConversationStore, SweepReport};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Starts the idle sweep loop; `None` when the store never expires conversations.
pub fn spawn(store: Arc<ConversationStore>, every: Duration) -> Option<JoinHandle<()>> {
    store.idle_timeout()?;
    let every = every.max(Duration::from_secs(1));

    info!(
        event_name = "system.sweeper.start",
        correlation_id = "bootstrap",
        interval_secs = every.as_secs(),
        "conversation sweeper started"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&store);
        }
    }))
}

pub fn sweep_once(store: &ConversationStore) -> SweepReport {
    let report = store.sweep();
    if report.expired > 0 || report.reclaimed > 0 {
        info!(
            event_name = "conversation.sweep",
            expired = report.expired,
            reclaimed = report.reclaimed,
            remaining = store.tracked_count(),
            "idle conversations swept"
        );
    } else {
        debug!(event_name = "conversation.sweep", remaining = store.tracked_count(), "nothing to sweep");
    }
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tally_core::flows::{ConversationKey, ConversationState, ConversationStore, FlowId, StepId};

    use super::spawn;

    #[tokio::test]
    async fn sweeper_is_not_started_without_an_idle_timeout() {
        let store = Arc::new(ConversationStore::new(None));
        assert!(spawn(store, Duration::from_secs(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_expires_idle_conversations_in_the_background() {
        let store = Arc::new(ConversationStore::new(Some(Duration::from_secs(60))));
        store
            .lock(&ConversationKey::new("alice"))
            .await
            .put(ConversationState::new(FlowId::AddOperation, StepId("amount")));
        let handle = spawn(Arc::clone(&store), Duration::from_secs(10)).expect("sweeper");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.active_count(), 1);

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(store.active_count(), 0);

        handle.abort();
    }
}
