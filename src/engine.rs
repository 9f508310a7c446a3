//! Sync engine: owns the store and every channel feeding it.
//!
//! ```text
//!              ┌────────────── SyncEngine ───────────────┐
//!  remote ───▶ │ BulkLoader ─┐                           │
//!  (REST)      │ Poller ─────┼──▶ StateStore ──▶ views   │
//!  (push) ───▶ │ LiveChannel ┘        ▲                  │
//!              │ WriteCoordinator ────┘   PreviewChannel │
//!              └─────────────────────────────────────────┘
//! ```
//!
//! ## Design
//! - One [`CancellationToken`] stops the push subscriptions and the poller;
//!   nothing is applied to the store after cancellation
//! - `start` is idempotent so a second call never doubles subscriptions
//! - Dropping the engine cancels its tasks; `shutdown` additionally waits
//!   for them to finish

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{SyncConfig, SyncSettings};
use crate::coordinator::WriteCoordinator;
use crate::gateway::{PostgrestGateway, RemoteGateway};
use crate::live::{ChangeFeed, LiveChannel, SubscriptionState};
use crate::loader::{BulkLoader, LoadReport};
use crate::model::Collection;
use crate::poller::PollingReconciler;
use crate::preview::PreviewChannel;
use crate::realtime::RealtimeFeed;
use crate::store::StateStore;

pub struct SyncEngine {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<StateStore>,
    preview: Arc<PreviewChannel>,
    writes: WriteCoordinator,
    loader: BulkLoader,
    live: LiveChannel,
    settings: SyncSettings,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        feed: Arc<dyn ChangeFeed>,
        settings: SyncSettings,
    ) -> Self {
        let store = Arc::new(StateStore::new());
        let preview = Arc::new(PreviewChannel::new());
        let writes = WriteCoordinator::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&preview),
        )
        .with_analytics_window(settings.analytics_window);
        let loader = BulkLoader::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            settings.analytics_window,
        );
        let live = LiveChannel::new(feed, Arc::clone(&store), settings.resubscribe_backoff());

        Self {
            gateway,
            store,
            preview,
            writes,
            loader,
            live,
            settings,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Engine talking to a real backend: PostgREST for reads and writes,
    /// Realtime for push events.
    pub fn connect(config: &SyncConfig) -> anyhow::Result<Self> {
        let gateway = Arc::new(PostgrestGateway::new(&config.remote)?);
        let feed = Arc::new(RealtimeFeed::new(&config.remote));
        tracing::info!(url = %config.remote.url, "Sync engine configured");
        Ok(Self::new(gateway, feed, config.sync.clone()))
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn writes(&self) -> &WriteCoordinator {
        &self.writes
    }

    pub fn preview(&self) -> &Arc<PreviewChannel> {
        &self.preview
    }

    pub fn subscription_state(&self, collection: Collection) -> SubscriptionState {
        self.live.state(collection)
    }

    /// Fetch every collection into the store. See [`BulkLoader::load_all`].
    pub async fn load_all(&self) -> LoadReport {
        self.loader.load_all().await
    }

    /// Start push subscriptions and the polling backstop.
    ///
    /// Returns `false` if already started (or shut down).
    pub fn start(&self) -> bool {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let mut tasks = self
            .live
            .spawn(&self.settings.live_collections, self.cancel.clone());
        let poller = PollingReconciler::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.store),
            self.settings.poll_collections.clone(),
            self.settings.poll_interval(),
        );
        tasks.push(poller.spawn(self.cancel.clone()));
        self.tasks.lock().extend(tasks);

        tracing::info!(
            live = self.settings.live_collections.len(),
            polled = self.settings.poll_collections.len(),
            interval_secs = self.settings.poll_interval_secs,
            "Sync channels started"
        );
        true
    }

    /// Cancel every background task and wait for them to stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Sync task ended abnormally: {e}");
            }
        }
        tracing::info!("Sync engine stopped");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use std::time::Duration;

    fn engine(gateway: &Arc<MemoryGateway>) -> SyncEngine {
        SyncEngine::new(gateway.clone(), gateway.clone(), SyncSettings::default())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let gateway = Arc::new(MemoryGateway::new());
        let engine = engine(&gateway);

        assert!(engine.start());
        assert!(!engine.start());
        settle().await;

        assert_eq!(gateway.subscriber_count("messages"), 1);
        assert_eq!(gateway.subscriber_count("conversations"), 1);
        assert_eq!(
            engine.subscription_state(Collection::Messages),
            SubscriptionState::Subscribed
        );
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let gateway = Arc::new(MemoryGateway::new());
        let engine = engine(&gateway);
        engine.start();
        settle().await;

        engine.shutdown().await;
        assert_eq!(gateway.subscriber_count("messages"), 0);
        assert_eq!(
            engine.subscription_state(Collection::Messages),
            SubscriptionState::Disconnected
        );
        assert!(!engine.start());

        let polls = gateway.call_count("fetch_all", "messages");
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(gateway.call_count("fetch_all", "messages"), polls);
    }
}
