//! In-process gateway for tests and offline runs.
//!
//! Holds every table as a vector of wire rows behind one lock, applies each
//! write atomically, and pushes the matching change event to anyone
//! subscribed through [`ChangeFeed`]. Per-table failures can be injected to
//! exercise rollback and partial-load paths.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{Filter, RemoteGateway};
use crate::error::GatewayError;
use crate::live::{ChangeEvent, ChangeFeed, ChangeKind};

/// Buffer size of each subscriber channel.
const FEED_CAPACITY: usize = 256;

/// Injected failure for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Transport,
    Reject(u16),
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Value>>,
    failures: HashMap<String, Failure>,
    subscribers: HashMap<String, Vec<mpsc::Sender<ChangeEvent>>>,
    next_id: i64,
    /// When set, writes do not produce change events.
    muted: bool,
    /// Remote calls made, as `(operation, table)`.
    calls: Vec<(&'static str, String)>,
}

impl MemoryState {
    fn check(&mut self, op: &'static str, table: &str) -> Result<(), GatewayError> {
        self.calls.push((op, table.to_string()));
        match self.failures.get(table) {
            None => Ok(()),
            Some(Failure::Transport) => Err(GatewayError::transport(table, "connection refused")),
            Some(Failure::Reject(status)) => Err(GatewayError::rejected(
                table,
                *status,
                "request rejected by policy",
            )),
        }
    }

    fn emit(&mut self, event: ChangeEvent) {
        if self.muted {
            return;
        }
        if let Some(senders) = self.subscribers.get_mut(&event.table) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                if tx.try_send(event.clone()).is_err() {
                    tracing::warn!(table = %event.table, "Change feed subscriber lagging, event dropped");
                }
            }
        }
    }

    fn assign_id(&mut self, row: &mut Value) {
        let Some(object) = row.as_object_mut() else {
            return;
        };
        if object.get("id").is_none_or(Value::is_null) {
            self.next_id += 1;
            object.insert("id".into(), Value::from(self.next_id));
        }
    }
}

/// In-memory [`RemoteGateway`] plus [`ChangeFeed`].
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a table's rows without emitting events.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.state.lock().tables.insert(table.to_string(), rows);
    }

    /// Current rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Reverse the stored order of a table (same content, different order).
    pub fn reverse(&self, table: &str) {
        if let Some(rows) = self.state.lock().tables.get_mut(table) {
            rows.reverse();
        }
    }

    /// Make every call on `table` fail as unreachable.
    pub fn fail_transport(&self, table: &str) {
        self.state
            .lock()
            .failures
            .insert(table.to_string(), Failure::Transport);
    }

    /// Make every call on `table` fail with a structured rejection.
    pub fn reject(&self, table: &str, status: u16) {
        self.state
            .lock()
            .failures
            .insert(table.to_string(), Failure::Reject(status));
    }

    /// Clear any injected failure on `table`.
    pub fn heal(&self, table: &str) {
        self.state.lock().failures.remove(table);
    }

    /// Stop emitting change events for writes (simulates a dead push path).
    pub fn mute_events(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    /// Close every open feed, as a dropped websocket would.
    pub fn drop_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Live subscribers on a table.
    pub fn subscriber_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(table)
            .map_or(0, |s| s.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Deliver an arbitrary event to a table's subscribers.
    pub fn push_event(&self, event: ChangeEvent) {
        let mut state = self.state.lock();
        let muted = std::mem::replace(&mut state.muted, false);
        state.emit(event);
        state.muted = muted;
    }

    /// Number of remote calls made with the given operation name
    /// (`fetch_all`, `insert`, `update`, `delete`, `upsert`) on `table`.
    pub fn call_count(&self, op: &str, table: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(o, t)| *o == op && t == table)
            .count()
    }
}

/// PostgREST PATCH semantics: listed columns are overwritten, others kept.
fn patch_row(row: &mut Value, patch: &Map<String, Value>) {
    if let Some(object) = row.as_object_mut() {
        for (key, value) in patch {
            object.insert(key.clone(), value.clone());
        }
    }
}

/// Bulk writes need every row to name the same columns.
fn same_key_sets(rows: &[Value]) -> bool {
    let keys = |row: &Value| -> Vec<String> {
        let mut keys: Vec<String> = row.as_object().map(|o| o.keys().cloned().collect()).unwrap_or_default();
        keys.sort();
        keys
    };
    match rows.split_first() {
        Some((first, rest)) => {
            let expected = keys(first);
            rest.iter().all(|row| keys(row) == expected)
        }
        None => true,
    }
}

fn same_id(a: &Value, b: &Value) -> bool {
    match (a.get("id"), b.get("id")) {
        (Some(x), Some(y)) => !x.is_null() && x == y,
        _ => false,
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn fetch_all(&self, table: &str) -> Result<Vec<Value>, GatewayError> {
        let mut state = self.state.lock();
        state.check("fetch_all", table)?;
        Ok(state.tables.get(table).cloned().unwrap_or_default())
    }

    async fn insert(&self, table: &str, mut row: Value) -> Result<Vec<Value>, GatewayError> {
        let mut state = self.state.lock();
        state.check("insert", table)?;
        if !row.is_object() {
            return Err(GatewayError::rejected(table, 400, "row must be an object"));
        }
        state.assign_id(&mut row);

        let rows = state.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|existing| same_id(existing, &row)) {
            return Err(GatewayError::rejected(
                table,
                409,
                "duplicate key value violates unique constraint",
            ));
        }
        rows.push(row.clone());

        state.emit(ChangeEvent {
            table: table.to_string(),
            kind: ChangeKind::Insert,
            record: Some(row.clone()),
            old_record: None,
        });
        Ok(vec![row])
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut state = self.state.lock();
        state.check("update", table)?;
        let Some(patch) = patch.as_object() else {
            return Err(GatewayError::rejected(table, 400, "patch must be an object"));
        };

        let mut changed = Vec::new();
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                let old = row.clone();
                patch_row(row, patch);
                changed.push((old, row.clone()));
            }
        }

        let mut updated = Vec::with_capacity(changed.len());
        for (old, new) in changed {
            state.emit(ChangeEvent {
                table: table.to_string(),
                kind: ChangeKind::Update,
                record: Some(new.clone()),
                old_record: Some(old),
            });
            updated.push(new);
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.check("delete", table)?;

        let mut removed = Vec::new();
        if let Some(rows) = state.tables.get_mut(table) {
            rows.retain(|row| {
                if filter.matches(row) {
                    removed.push(row.clone());
                    false
                } else {
                    true
                }
            });
        }

        for old in removed {
            state.emit(ChangeEvent {
                table: table.to_string(),
                kind: ChangeKind::Delete,
                record: None,
                old_record: Some(old),
            });
        }
        Ok(())
    }

    async fn upsert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, GatewayError> {
        let mut state = self.state.lock();
        state.check("upsert", table)?;
        if rows.iter().any(|r| !r.is_object()) {
            return Err(GatewayError::rejected(table, 400, "rows must be objects"));
        }
        if !same_key_sets(&rows) {
            return Err(GatewayError::rejected(table, 400, "All object keys must match"));
        }

        let mut events = Vec::with_capacity(rows.len());
        let mut stored = Vec::with_capacity(rows.len());
        for mut row in rows {
            state.assign_id(&mut row);
            let existing = state.tables.entry(table.to_string()).or_default();
            match existing.iter_mut().find(|r| same_id(r, &row)) {
                Some(current) => {
                    let old = current.clone();
                    if let Some(patch) = row.as_object() {
                        patch_row(current, patch);
                    }
                    events.push((ChangeKind::Update, current.clone(), Some(old)));
                    stored.push(current.clone());
                }
                None => {
                    existing.push(row.clone());
                    events.push((ChangeKind::Insert, row.clone(), None));
                    stored.push(row);
                }
            }
        }

        for (kind, record, old_record) in events {
            state.emit(ChangeEvent {
                table: table.to_string(),
                kind,
                record: Some(record),
                old_record,
            });
        }
        Ok(stored)
    }
}

#[async_trait]
impl ChangeFeed for MemoryGateway {
    async fn subscribe(&self, table: &str) -> Result<mpsc::Receiver<ChangeEvent>, GatewayError> {
        let mut state = self.state.lock();
        if let Some(Failure::Transport) = state.failures.get(table) {
            return Err(GatewayError::transport(table, "realtime unavailable"));
        }
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        state
            .subscribers
            .entry(table.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

// ── Tests ────────────────────────────────────────────────────────
