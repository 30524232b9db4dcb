use lib_common::configs::EngineSettings;
use lib_common::{ConsumerRegistry, ItemStore, RotationEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared by every handler and streaming session.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ItemStore>,
    pub engine: Arc<RotationEngine>,
    pub max_text_len: usize,
    // Cancelled when the server shuts down; open streams close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(store: Arc<dyn ItemStore>, settings: &EngineSettings, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(ConsumerRegistry::new(
            store.clone(),
            settings.monitor_count,
            settings.rotation.page_size,
        ));
        let engine = Arc::new(RotationEngine::new(store.clone(), registry, settings.rotation.clone()));
        Self {
            store,
            engine,
            max_text_len: settings.max_text_len,
            shutdown,
        }
    }

    /// Pins every monitor's high-water mark to the store's current maximum id.
    ///
    /// Must finish before the dispatcher starts, or items it assigns in the
    /// meantime would count as already shown. Retries every `retry_every`
    /// while the store is unreachable; returns `false` if shutdown came first.
    pub async fn capture_baseline(&self, retry_every: Duration) -> bool {
        loop {
            match self.engine.registry().warm_up().await {
                Ok(()) => {
                    info!("Monitor high-water marks captured.");
                    return true;
                }
                Err(e) => warn!("Could not read the high-water baseline, retrying: {}", e),
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(retry_every) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use lib_common::{Dispatcher, MemoryItemStore};

    #[tokio::test]
    async fn items_dispatched_before_the_first_client_are_shown() {
        let store = Arc::new(MemoryItemStore::new());
        store.insert_at("history", Utc::now() - TimeDelta::hours(1));
        store.insert_at("history", Utc::now() - TimeDelta::hours(1));
        let settings = EngineSettings::default();
        let state = AppState::new(store.clone(), &settings, CancellationToken::new());

        assert!(state.capture_baseline(Duration::from_secs(1)).await);

        let fresh = store.insert_at("queued after start", Utc::now() - TimeDelta::minutes(10));
        let mut dispatcher = Dispatcher::new(store.clone(), settings.monitor_count, settings.dispatcher.clone());
        dispatcher.run_cycle().await;

        // Ids 1 and 2 predate the start; id 3 went to whichever monitor came up.
        let mut shown = Vec::new();
        for monitor in 1..=settings.monitor_count.get() {
            if let Some(item) = state.engine.tick(monitor).await.unwrap().current {
                shown.push(item.id);
            }
        }
        shown.sort();
        assert_eq!(shown, vec![fresh]);
    }

    #[tokio::test(start_paused = true)]
    async fn baseline_capture_retries_until_the_store_is_back() {
        let store = Arc::new(MemoryItemStore::new());
        store.set_unavailable(true);
        let state = AppState::new(store.clone(), &EngineSettings::default(), CancellationToken::new());

        let capture = tokio::spawn({
            let state = state.clone();
            async move { state.capture_baseline(Duration::from_secs(5)).await }
        });
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(!capture.is_finished());

        store.set_unavailable(false);
        assert!(capture.await.unwrap());
        assert_eq!(state.engine.registry().active_consumers(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn baseline_capture_gives_up_on_shutdown() {
        let store = Arc::new(MemoryItemStore::new());
        store.set_unavailable(true);
        let shutdown = CancellationToken::new();
        let state = AppState::new(store, &EngineSettings::default(), shutdown.clone());

        shutdown.cancel();
        assert!(!state.capture_baseline(Duration::from_secs(5)).await);
    }
}
