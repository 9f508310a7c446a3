//! Live update channel: push-based row changes applied to the store.
//!
//! ## Design
//! - One task per subscribed collection, each owning its feed receiver
//! - Events apply in arrival order; each application is one store step
//! - Insert appends only if the id is unknown, update replaces in place
//!   (no-op when missing), delete removes by id; other records keep their
//!   relative order
//! - A closed feed is resubscribed after a backoff; the whole thing stops
//!   when the shared [`CancellationToken`] fires, and a cancelled task
//!   never applies another event

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::mapper;
use crate::model::{
    AnalyticsEvent, Booking, Broadcast, Collection, Conversation, DataExportLog, Message,
    Notification, Plan, Profile, RecordId, ServiceOffering, Transaction,
};
use crate::store::{settings_from_wire, Position, StateStore, Stored};

// ── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change on a remote table, with records in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    /// New row (insert, update).
    pub record: Option<Value>,
    /// Previous row (update, delete). May carry only the primary key.
    pub old_record: Option<Value>,
}

/// Source of per-table change streams.
///
/// The returned receiver closing means the subscription dropped.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<ChangeEvent>, GatewayError>;
}

/// Subscription lifecycle of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Subscribed,
}

/// What applying one event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Deleted,
    /// Valid event with nothing to do (duplicate insert, unknown id, equal content).
    Unchanged,
    /// Event for an unknown table or without a usable record.
    Ignored,
}

// ── Applying events ──────────────────────────────────────────────

/// Apply one change event to the store.
pub fn apply_change(store: &StateStore, event: &ChangeEvent) -> ApplyOutcome {
    let Some(collection) = Collection::from_table(&event.table) else {
        return ApplyOutcome::Ignored;
    };
    match collection {
        Collection::Configuration => apply_settings(store, event),
        Collection::ServiceOfferings => apply_typed::<ServiceOffering>(store, event),
        Collection::Plans => apply_typed::<Plan>(store, event),
        Collection::Profiles => apply_typed::<Profile>(store, event),
        Collection::Bookings => apply_typed::<Booking>(store, event),
        Collection::Transactions => apply_typed::<Transaction>(store, event),
        Collection::Conversations => apply_typed::<Conversation>(store, event),
        Collection::Messages => apply_typed::<Message>(store, event),
        Collection::Notifications => apply_typed::<Notification>(store, event),
        Collection::Broadcasts => apply_typed::<Broadcast>(store, event),
        Collection::AnalyticsEvents => apply_typed::<AnalyticsEvent>(store, event),
        Collection::ExportLogs => apply_typed::<DataExportLog>(store, event),
    }
}

fn apply_typed<T: Stored>(store: &StateStore, event: &ChangeEvent) -> ApplyOutcome {
    match event.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(row) = &event.record else {
                return ApplyOutcome::Ignored;
            };
            let item: T = match mapper::decode(row) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(table = %event.table, "Dropping live event: {e}");
                    return ApplyOutcome::Ignored;
                }
            };
            if event.kind == ChangeKind::Insert {
                if store.insert(item, Position::Back) {
                    ApplyOutcome::Inserted
                } else {
                    ApplyOutcome::Unchanged
                }
            } else if store.replace_by_id(item) {
                ApplyOutcome::Updated
            } else {
                ApplyOutcome::Unchanged
            }
        }
        ChangeKind::Delete => {
            let Some(id) = event
                .old_record
                .as_ref()
                .or(event.record.as_ref())
                .and_then(RecordId::from_row)
            else {
                return ApplyOutcome::Ignored;
            };
            if store.remove::<T>(&id).is_some() {
                ApplyOutcome::Deleted
            } else {
                ApplyOutcome::Unchanged
            }
        }
    }
}

fn apply_settings(store: &StateStore, event: &ChangeEvent) -> ApplyOutcome {
    match (&event.kind, &event.record) {
        (ChangeKind::Insert | ChangeKind::Update, Some(row)) => {
            if store.set_settings(settings_from_wire(row)) {
                ApplyOutcome::Updated
            } else {
                ApplyOutcome::Unchanged
            }
        }
        // The singleton row is never removed locally; defaults stay in place.
        _ => ApplyOutcome::Ignored,
    }
}

// ── LiveChannel ──────────────────────────────────────────────────

/// Runs one subscription task per collection.
pub struct LiveChannel {
    feed: Arc<dyn ChangeFeed>,
    store: Arc<StateStore>,
    resubscribe_backoff: Duration,
    states: Arc<Mutex<HashMap<Collection, SubscriptionState>>>,
}

impl LiveChannel {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        store: Arc<StateStore>,
        resubscribe_backoff: Duration,
    ) -> Self {
        Self {
            feed,
            store,
            resubscribe_backoff,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current state of a collection's subscription.
    pub fn state(&self, collection: Collection) -> SubscriptionState {
        self.states
            .lock()
            .get(&collection)
            .copied()
            .unwrap_or(SubscriptionState::Disconnected)
    }

    /// Spawn a subscription task for each collection.
    pub fn spawn(&self, collections: &[Collection], cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        collections
            .iter()
            .map(|&collection| {
                let worker = Subscription {
                    collection,
                    feed: Arc::clone(&self.feed),
                    store: Arc::clone(&self.store),
                    backoff: self.resubscribe_backoff,
                    states: Arc::clone(&self.states),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

struct Subscription {
    collection: Collection,
    feed: Arc<dyn ChangeFeed>,
    store: Arc<StateStore>,
    backoff: Duration,
    states: Arc<Mutex<HashMap<Collection, SubscriptionState>>>,
    cancel: CancellationToken,
}

impl Subscription {
    fn set_state(&self, state: SubscriptionState) {
        self.states.lock().insert(self.collection, state);
    }

    async fn run(self) {
        let table = self.collection.table();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.feed.subscribe(table) => result,
            };

            match subscribed {
                Ok(mut events) => {
                    self.set_state(SubscriptionState::Subscribed);
                    tracing::info!(table, "Live subscription active");
                    loop {
                        let event = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => None,
                            event = events.recv() => event,
                        };
                        let Some(event) = event else { break };
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let outcome = apply_change(&self.store, &event);
                        tracing::debug!(table, kind = ?event.kind, outcome = ?outcome, "Live event applied");
                    }
                    self.set_state(SubscriptionState::Disconnected);
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!(table, "Live subscription closed, resubscribing");
                }
                Err(e) => {
                    self.set_state(SubscriptionState::Disconnected);
                    tracing::warn!(table, "Live subscription failed: {e}");
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
        self.set_state(SubscriptionState::Disconnected);
        tracing::info!(table, "Live subscription stopped");
    }
}

// ── Tests ────────────────────────────────────────────────────────
