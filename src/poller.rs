//! Polling reconciler: a slow backstop for missed push events.
//!
//! Every interval the volatile collections are fetched in full and swapped
//! in only when their content (sorted by id) differs from what the store
//! already holds. Fetch failures are logged and skipped until the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::gateway::RemoteGateway;
use crate::model::Collection;
use crate::store::{Compare, StateStore};

/// Result of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Collections whose content changed and were replaced.
    pub changed: Vec<Collection>,
    /// Collections that could not be fetched.
    pub failed: Vec<Collection>,
}

pub struct PollingReconciler {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<StateStore>,
    collections: Vec<Collection>,
    interval: Duration,
}

impl PollingReconciler {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<StateStore>,
        collections: Vec<Collection>,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            collections,
            interval,
        }
    }

    /// Fetch and reconcile every polled collection once.
    ///
    /// Nothing is committed once `cancel` has fired.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();
        for &collection in &self.collections {
            let rows = match self.gateway.fetch_all(collection.table()).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(table = collection.table(), "Poll fetch failed: {e}");
                    report.failed.push(collection);
                    continue;
                }
            };
            if cancel.is_cancelled() {
                break;
            }
            let refresh = self
                .store
                .refresh_from_wire(collection, &rows, Compare::Content);
            if refresh.changed {
                tracing::debug!(table = collection.table(), count = refresh.count, "Poll picked up changes");
                report.changed.push(collection);
            }
        }
        report
    }

    /// Run cycles on a fixed interval until cancelled.
    ///
    /// The first cycle runs one full interval after start. Cycles run
    /// back-to-back inside this task, and ticks missed while a cycle was
    /// slow are skipped, so cycles never overlap.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the bulk load covers it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.run_cycle(&cancel).await;
            }
            tracing::info!("Polling stopped");
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
