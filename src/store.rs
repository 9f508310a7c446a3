//! In-memory application state.
//!
//! One typed slot per collection plus the settings singleton. Every
//! mutation is a single step under a short `parking_lot` lock (never held
//! across an `.await`), and every mutation that actually changes content
//! publishes a [`StoreChange`] to subscribers.
//!
//! ## Design
//! - Typed access goes through the [`Stored`] trait, so callers write
//!   `store.items::<Booking>()` instead of naming a field
//! - Writers from different paths (load, live, poll, optimistic writes)
//!   only ever replace, splice by id, or modify by id; none of them can
//!   observe a half-applied change from another
//! - Change notifications are suppressed when the new content equals the
//!   old, which is what keeps polling from causing flicker

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::mapper;
use crate::model::{
    AnalyticsEvent, Booking, Broadcast, Collection, Conversation, DataExportLog, Entity, Message,
    Notification, Plan, Profile, RecordId, ServiceOffering, SiteSettings, Transaction,
};

/// Capacity of the change broadcast. Slow subscribers see `Lagged`.
const CHANGE_CAPACITY: usize = 256;

// ── Change notifications ─────────────────────────────────────────

/// Published after a collection's content changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub collection: Collection,
    /// Store-wide, strictly increasing change counter.
    pub version: u64,
}

/// Where an inserted record goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Front,
    Back,
}

/// How a bulk replacement decides whether anything changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    /// Order-sensitive equality.
    Exact,
    /// Sorted-by-id serialized content; reordering alone is not a change.
    Content,
}

/// Outcome of refreshing a collection from wire rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Refresh {
    pub changed: bool,
    /// Records now held from this batch.
    pub count: usize,
    /// Rows that could not be decoded.
    pub skipped: usize,
}

// ── Slots ────────────────────────────────────────────────────────

/// Ordered records of one collection.
pub struct CollectionSlot<T> {
    items: RwLock<Vec<T>>,
}

impl<T> Default for CollectionSlot<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
        }
    }
}

/// An entity type with a slot in [`StateStore`].
pub trait Stored: Entity {
    fn slot(store: &StateStore) -> &CollectionSlot<Self>;
}

macro_rules! stored {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl Stored for $ty {
                fn slot(store: &StateStore) -> &CollectionSlot<Self> {
                    &store.$field
                }
            }
        )*
    };
}

stored! {
    ServiceOffering => services,
    Plan => plans,
    Profile => profiles,
    Booking => bookings,
    Transaction => transactions,
    Conversation => conversations,
    Message => messages,
    Notification => notifications,
    Broadcast => broadcasts,
    AnalyticsEvent => analytics,
    DataExportLog => exports,
}

/// Id-sorted serialized form used for content equality.
fn fingerprint<T: Entity>(items: &[T]) -> Vec<(RecordId, String)> {
    let mut prints: Vec<(RecordId, String)> = items
        .iter()
        .map(|item| {
            let print = serde_json::to_string(item).unwrap_or_else(|e| {
                tracing::warn!(
                    collection = %T::COLLECTION,
                    id = %item.id(),
                    "Record not serializable, fingerprinted as empty: {e}"
                );
                String::new()
            });
            (item.id().clone(), print)
        })
        .collect();
    prints.sort();
    prints
}

// ── StateStore ───────────────────────────────────────────────────

/// The shared state every sync path reads and writes.
pub struct StateStore {
    settings: RwLock<SiteSettings>,
    services: CollectionSlot<ServiceOffering>,
    plans: CollectionSlot<Plan>,
    profiles: CollectionSlot<Profile>,
    bookings: CollectionSlot<Booking>,
    transactions: CollectionSlot<Transaction>,
    conversations: CollectionSlot<Conversation>,
    messages: CollectionSlot<Message>,
    notifications: CollectionSlot<Notification>,
    broadcasts: CollectionSlot<Broadcast>,
    analytics: CollectionSlot<AnalyticsEvent>,
    exports: CollectionSlot<DataExportLog>,
    version: AtomicU64,
    changes: broadcast::Sender<StoreChange>,
    loading: AtomicBool,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Empty store holding the built-in settings, in the loading state.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            settings: RwLock::new(SiteSettings::default()),
            services: CollectionSlot::default(),
            plans: CollectionSlot::default(),
            profiles: CollectionSlot::default(),
            bookings: CollectionSlot::default(),
            transactions: CollectionSlot::default(),
            conversations: CollectionSlot::default(),
            messages: CollectionSlot::default(),
            notifications: CollectionSlot::default(),
            broadcasts: CollectionSlot::default(),
            analytics: CollectionSlot::default(),
            exports: CollectionSlot::default(),
            version: AtomicU64::new(0),
            changes,
            loading: AtomicBool::new(true),
        }
    }

    /// Receive a [`StoreChange`] for every content change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Current change counter.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn notify(&self, collection: Collection) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(collection = %collection, version, "Store changed");
        // No receivers is fine.
        let _ = self.changes.send(StoreChange {
            collection,
            version,
        });
    }

    // ── Loading flag ─────────────────────────────────────────────

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Clear the loading flag. Returns `true` only for the call that
    /// actually flipped it.
    pub fn finish_loading(&self) -> bool {
        self.loading.swap(false, Ordering::SeqCst)
    }

    // ── Settings ─────────────────────────────────────────────────

    pub fn settings(&self) -> SiteSettings {
        self.settings.read().clone()
    }

    /// Replace the settings. Returns whether anything changed.
    pub fn set_settings(&self, settings: SiteSettings) -> bool {
        {
            let mut current = self.settings.write();
            if *current == settings {
                return false;
            }
            *current = settings;
        }
        self.notify(Collection::Configuration);
        true
    }

    /// Modify the settings in place. Returns the new value.
    pub fn update_settings(&self, f: impl FnOnce(&mut SiteSettings)) -> SiteSettings {
        let (changed, updated) = {
            let mut current = self.settings.write();
            let before = current.clone();
            f(&mut current);
            (*current != before, current.clone())
        };
        if changed {
            self.notify(Collection::Configuration);
        }
        updated
    }

    // ── Typed reads ──────────────────────────────────────────────

    /// Snapshot of a collection in display order.
    pub fn items<T: Stored>(&self) -> Vec<T> {
        T::slot(self).items.read().clone()
    }

    pub fn get<T: Stored>(&self, id: &RecordId) -> Option<T> {
        T::slot(self)
            .items
            .read()
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    pub fn contains<T: Stored>(&self, id: &RecordId) -> bool {
        T::slot(self).items.read().iter().any(|item| item.id() == id)
    }

    pub fn len<T: Stored>(&self) -> usize {
        T::slot(self).items.read().len()
    }

    // ── Typed writes ─────────────────────────────────────────────

    /// Replace a whole collection. Notifies only if the new list differs
    /// (order included).
    pub fn replace<T: Stored>(&self, items: Vec<T>) -> bool {
        {
            let mut current = T::slot(self).items.write();
            if *current == items {
                return false;
            }
            *current = items;
        }
        self.notify(T::COLLECTION);
        true
    }

    /// Replace a collection only if its content differs from what is held,
    /// ignoring order. On equal content the current order is kept.
    pub fn replace_if_changed<T: Stored>(&self, items: Vec<T>) -> bool {
        let incoming = fingerprint(&items);
        {
            let mut current = T::slot(self).items.write();
            if fingerprint(&current) == incoming {
                return false;
            }
            *current = items;
        }
        self.notify(T::COLLECTION);
        true
    }

    /// Insert a record unless one with the same id is already present.
    pub fn insert<T: Stored>(&self, item: T, position: Position) -> bool {
        {
            let mut current = T::slot(self).items.write();
            if current.iter().any(|existing| existing.id() == item.id()) {
                return false;
            }
            match position {
                Position::Front => current.insert(0, item),
                Position::Back => current.push(item),
            }
        }
        self.notify(T::COLLECTION);
        true
    }

    /// Replace the record with the same id in place. No-op if absent or equal.
    pub fn replace_by_id<T: Stored>(&self, item: T) -> bool {
        {
            let mut current = T::slot(self).items.write();
            match current.iter_mut().find(|existing| existing.id() == item.id()) {
                Some(existing) if *existing != item => *existing = item,
                _ => return false,
            }
        }
        self.notify(T::COLLECTION);
        true
    }

    /// Modify one record in place and return its new value.
    pub fn modify<T: Stored>(&self, id: &RecordId, f: impl FnOnce(&mut T)) -> Option<T> {
        let (changed, updated) = {
            let mut current = T::slot(self).items.write();
            let existing = current.iter_mut().find(|item| item.id() == id)?;
            let before = existing.clone();
            f(existing);
            (*existing != before, existing.clone())
        };
        if changed {
            self.notify(T::COLLECTION);
        }
        Some(updated)
    }

    /// Modify every record matching `pred`. Returns how many changed.
    pub fn modify_where<T: Stored>(
        &self,
        pred: impl Fn(&T) -> bool,
        f: impl Fn(&mut T),
    ) -> usize {
        let changed = {
            let mut current = T::slot(self).items.write();
            let mut changed = 0;
            for item in current.iter_mut().filter(|item| pred(item)) {
                let before = item.clone();
                f(item);
                if *item != before {
                    changed += 1;
                }
            }
            changed
        };
        if changed > 0 {
            self.notify(T::COLLECTION);
        }
        changed
    }

    /// Remove a record by id.
    pub fn remove<T: Stored>(&self, id: &RecordId) -> Option<T> {
        let removed = {
            let mut current = T::slot(self).items.write();
            let index = current.iter().position(|item| item.id() == id)?;
            current.remove(index)
        };
        self.notify(T::COLLECTION);
        Some(removed)
    }

    /// Keep only records matching `keep`. Returns how many were removed.
    pub fn retain<T: Stored>(&self, keep: impl Fn(&T) -> bool) -> usize {
        let removed = {
            let mut current = T::slot(self).items.write();
            let before = current.len();
            current.retain(|item| keep(item));
            before - current.len()
        };
        if removed > 0 {
            self.notify(T::COLLECTION);
        }
        removed
    }

    /// Keep at most `len` records, dropping from the back.
    pub fn truncate<T: Stored>(&self, len: usize) -> usize {
        let removed = {
            let mut current = T::slot(self).items.write();
            let removed = current.len().saturating_sub(len);
            current.truncate(len);
            removed
        };
        if removed > 0 {
            self.notify(T::COLLECTION);
        }
        removed
    }

    /// Swap an optimistic record for the server's version.
    ///
    /// If a record with the authoritative id is already present (a push
    /// event got there first), the optimistic copy is dropped and the
    /// existing one updated, so the collection never holds both.
    pub fn reconcile<T: Stored>(&self, local_id: &RecordId, authoritative: T) {
        let changed = {
            let mut current = T::slot(self).items.write();
            let local_index = current.iter().position(|item| item.id() == local_id);
            let existing_index = if authoritative.id() == local_id {
                None
            } else {
                current
                    .iter()
                    .position(|item| item.id() == authoritative.id())
            };

            match (local_index, existing_index) {
                (Some(local), Some(existing)) => {
                    current[existing] = authoritative;
                    current.remove(local);
                    true
                }
                (Some(local), None) => {
                    if current[local] == authoritative {
                        false
                    } else {
                        current[local] = authoritative;
                        true
                    }
                }
                (None, Some(existing)) => {
                    if current[existing] == authoritative {
                        false
                    } else {
                        current[existing] = authoritative;
                        true
                    }
                }
                (None, None) => {
                    current.push(authoritative);
                    true
                }
            }
        };
        if changed {
            self.notify(T::COLLECTION);
        }
    }

    // ── Wire refresh ─────────────────────────────────────────────

    /// Map, decode, and swap in a collection fetched from the remote store.
    ///
    /// Undecodable rows are skipped. For the settings singleton the first
    /// row is merged onto the built-in defaults; zero rows keep what is held.
    pub fn refresh_from_wire(
        &self,
        collection: Collection,
        rows: &[Value],
        compare: Compare,
    ) -> Refresh {
        match collection {
            Collection::Configuration => self.refresh_settings(rows),
            Collection::ServiceOfferings => self.refresh_typed::<ServiceOffering>(rows, compare),
            Collection::Plans => self.refresh_typed::<Plan>(rows, compare),
            Collection::Profiles => self.refresh_typed::<Profile>(rows, compare),
            Collection::Bookings => self.refresh_typed::<Booking>(rows, compare),
            Collection::Transactions => self.refresh_typed::<Transaction>(rows, compare),
            Collection::Conversations => self.refresh_typed::<Conversation>(rows, compare),
            Collection::Messages => self.refresh_typed::<Message>(rows, compare),
            Collection::Notifications => self.refresh_typed::<Notification>(rows, compare),
            Collection::Broadcasts => self.refresh_typed::<Broadcast>(rows, compare),
            Collection::AnalyticsEvents => self.refresh_typed::<AnalyticsEvent>(rows, compare),
            Collection::ExportLogs => self.refresh_typed::<DataExportLog>(rows, compare),
        }
    }

    fn refresh_typed<T: Stored>(&self, rows: &[Value], compare: Compare) -> Refresh {
        let (items, skipped) = mapper::decode_rows::<T>(rows);
        let count = items.len();
        let changed = match compare {
            Compare::Exact => self.replace(items),
            Compare::Content => self.replace_if_changed(items),
        };
        Refresh {
            changed,
            count,
            skipped,
        }
    }

    fn refresh_settings(&self, rows: &[Value]) -> Refresh {
        let Some(row) = rows.first() else {
            return Refresh::default();
        };
        if rows.len() > 1 {
            tracing::warn!(rows = rows.len(), "Multiple settings rows, using the first");
        }
        let changed = self.set_settings(settings_from_wire(row));
        Refresh {
            changed,
            count: 1,
            skipped: 0,
        }
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub fn services(&self) -> Vec<ServiceOffering> {
        self.items()
    }

    pub fn plans(&self) -> Vec<Plan> {
        self.items()
    }

    pub fn profiles(&self) -> Vec<Profile> {
        self.items()
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.items()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.items()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.items()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.items()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.items()
    }

    /// Notifications addressed to every administrator.
    pub fn admin_notifications(&self) -> Vec<Notification> {
        self.notifications
            .items
            .read()
            .iter()
            .filter(|n| n.is_for_admins())
            .cloned()
            .collect()
    }

    /// Notifications addressed to one user.
    pub fn user_notifications(&self, user_id: &str) -> Vec<Notification> {
        self.notifications
            .items
            .read()
            .iter()
            .filter(|n| n.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    /// Messages of one conversation, in store order.
    pub fn messages_for(&self, conversation_id: &str) -> Vec<Message> {
        self.messages
            .items
            .read()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Conversation a message belongs to, if it is loaded.
    pub fn message_conversation(&self, message: &Message) -> Option<Conversation> {
        self.get(&RecordId::from(message.conversation_id.as_str()))
    }

    /// Display name for a booking's owner: the profile's name when the
    /// profile is loaded, else the name on the booking.
    pub fn booking_owner_name(&self, booking: &Booking) -> String {
        booking
            .customer_id
            .as_deref()
            .and_then(|id| self.get::<Profile>(&RecordId::from(id)))
            .map(|profile| profile.name)
            .unwrap_or_else(|| booking.full_name.clone())
    }

    /// Booking a transaction pays for, if any and loaded.
    pub fn transaction_booking(&self, transaction: &Transaction) -> Option<Booking> {
        let id = transaction.booking_id.as_deref()?;
        self.get(&RecordId::from(id))
    }
}

/// Settings from one wire row, merged onto the built-in defaults.
pub(crate) fn settings_from_wire(row: &Value) -> SiteSettings {
    let mut internal = mapper::to_internal(Collection::Configuration, row);
    if let Some(object) = internal.as_object_mut() {
        object.remove("id");
    }
    SiteSettings::from_internal(&internal)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn booking(id: &str, name: &str) -> Booking {
        serde_json::from_value(json!({"id": id, "fullName": name})).unwrap()
    }

    #[test]
    fn insert_is_idempotent_by_id() {
        let store = StateStore::new();
        assert!(store.insert(booking("BK-1", "Ana"), Position::Back));
        assert!(!store.insert(booking("BK-1", "Other"), Position::Back));
        assert_eq!(store.len::<Booking>(), 1);
        assert_eq!(store.bookings()[0].full_name, "Ana");
    }

    #[test]
    fn content_replace_ignores_order() {
        let store = StateStore::new();
        store.replace(vec![booking("BK-1", "Ana"), booking("BK-2", "Ben")]);
        let mut rx = store.subscribe();

        assert!(!store.replace_if_changed(vec![booking("BK-2", "Ben"), booking("BK-1", "Ana")]));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.bookings()[0].id, RecordId::from("BK-1"));

        assert!(store.replace_if_changed(vec![booking("BK-2", "Ben")]));
        assert_eq!(rx.try_recv().unwrap().collection, Collection::Bookings);
    }

    #[test]
    fn modify_notifies_only_on_change() {
        let store = StateStore::new();
        store.replace(vec![booking("BK-1", "Ana")]);
        let mut rx = store.subscribe();

        store.modify::<Booking>(&RecordId::from("BK-1"), |b| b.full_name = "Ana".into());
        assert!(rx.try_recv().is_err());

        let updated = store
            .modify::<Booking>(&RecordId::from("BK-1"), |b| b.full_name = "Anna".into())
            .unwrap();
        assert_eq!(updated.full_name, "Anna");
        assert!(rx.try_recv().is_ok());

        assert!(store
            .modify::<Booking>(&RecordId::from("BK-9"), |_| {})
            .is_none());
    }

    #[test]
    fn reconcile_swaps_local_placeholder() {
        let store = StateStore::new();
        let local = RecordId::local();
        let mut placeholder: Notification =
            serde_json::from_value(json!({"id": 0, "title": "hi"})).unwrap();
        placeholder.id = local.clone();
        store.insert(placeholder, Position::Front);

        let stored: Notification =
            serde_json::from_value(json!({"id": 42, "title": "hi"})).unwrap();
        store.reconcile(&local, stored);

        let items = store.notifications();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, RecordId::Int(42));
    }

    #[test]
    fn reconcile_drops_placeholder_when_push_won() {
        let store = StateStore::new();
        let local = RecordId::local();
        let mut placeholder: Notification =
            serde_json::from_value(json!({"id": 0, "title": "hi"})).unwrap();
        placeholder.id = local.clone();
        store.insert(placeholder, Position::Front);
        let pushed: Notification =
            serde_json::from_value(json!({"id": 42, "title": "hi"})).unwrap();
        store.insert(pushed.clone(), Position::Back);

        store.reconcile(&local, pushed);
        let items = store.notifications();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, RecordId::Int(42));
    }

    #[test]
    fn loading_flag_flips_once() {
        let store = StateStore::new();
        assert!(store.is_loading());
        assert!(store.finish_loading());
        assert!(!store.finish_loading());
        assert!(!store.is_loading());
    }

    #[test]
    fn settings_refresh_merges_first_row() {
        let store = StateStore::new();
        let refresh = store.refresh_from_wire(
            Collection::Configuration,
            &[
                json!({"id": 1, "primary_color": "#000000"}),
                json!({"id": 2, "primary_color": "#ffffff"}),
            ],
            Compare::Exact,
        );
        assert!(refresh.changed);
        let settings = store.settings();
        assert_eq!(settings.colors.primary, "#000000");
        assert_eq!(settings.colors.secondary, "#1a1a1a");
        assert!(!settings.extra.contains_key("id"));
    }

    #[test]
    fn ill_typed_settings_column_keeps_other_overrides() {
        let store = StateStore::new();
        store.refresh_from_wire(
            Collection::Configuration,
            &[json!({"primary_color": "#000000", "site_name": "Blackline Pro", "show_legal": "yes"})],
            Compare::Exact,
        );
        let settings = store.settings();
        assert_eq!(settings.colors.primary, "#000000");
        assert_eq!(settings.site_name, "Blackline Pro");
        assert_eq!(settings.show_legal, SiteSettings::default().show_legal);
    }

    #[derive(Debug, Clone, PartialEq, serde::Deserialize)]
    struct Opaque {
        id: RecordId,
    }

    impl serde::Serialize for Opaque {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    impl Entity for Opaque {
        const COLLECTION: Collection = Collection::Plans;

        fn id(&self) -> &RecordId {
            &self.id
        }

        fn set_id(&mut self, id: RecordId) {
            self.id = id;
        }
    }

    #[test]
    fn unserializable_records_fingerprint_by_id_only() {
        let prints = fingerprint(&[
            Opaque { id: RecordId::from("b") },
            Opaque { id: RecordId::from("a") },
        ]);
        assert_eq!(
            prints,
            vec![
                (RecordId::from("a"), String::new()),
                (RecordId::from("b"), String::new()),
            ]
        );
    }

    #[test]
    fn empty_settings_table_keeps_current() {
        let store = StateStore::new();
        let refresh = store.refresh_from_wire(Collection::Configuration, &[], Compare::Exact);
        assert!(!refresh.changed);
        assert_eq!(store.settings(), SiteSettings::default());
    }

    #[test]
    fn dependent_lookups_degrade_gracefully() {
        let store = StateStore::new();
        let walk_in: Booking = serde_json::from_value(json!({
            "id": "BK-1", "customerId": "u-missing", "fullName": "Walk In"
        }))
        .unwrap();
        assert_eq!(store.booking_owner_name(&walk_in), "Walk In");

        store.replace(vec![serde_json::from_value::<Profile>(json!({
            "id": "u-missing", "name": "Sam"
        }))
        .unwrap()]);
        assert_eq!(store.booking_owner_name(&walk_in), "Sam");

        let tx: Transaction =
            serde_json::from_value(json!({"id": "TRX-1", "bookingId": "BK-404"})).unwrap();
        assert!(store.transaction_booking(&tx).is_none());
    }
}
