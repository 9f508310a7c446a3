//! Optimistic write coordinator: every consumer-facing mutation.
//!
//! Each operation follows the same sequence:
//!
//! ```text
//! snapshot ──▶ apply locally ──▶ remote call ──┬─ ok ──▶ reconcile with server row
//!                                              └─ err ─▶ restore snapshot, typed error
//! ```
//!
//! The caller sees the change immediately and, on failure, sees it vanish
//! together with a [`SyncError`] saying whether a retry makes sense.
//!
//! ## Design
//! - Records whose id the server assigns get a `local-` placeholder that is
//!   swapped for the real id on success; if a push event delivered the
//!   real row first, the placeholder is dropped instead of duplicated
//! - Side effects (owner and admin notifications, conversation preview
//!   fields) run after the main write succeeded; their failure is logged
//!   and never undoes the main write
//! - Booking and transaction status changes are checked against their
//!   lifecycle before anything is applied

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use crate::error::{GatewayError, SyncError};
use crate::gateway::{Filter, RemoteGateway};
use crate::mapper;
use crate::model::settings::SETTINGS_ROW_ID;
use crate::model::{
    now_rfc3339, AnalyticsEvent, Booking, BookingStatus, Broadcast, Collection, Conversation,
    DataExportLog, Entity, Message, MessageState, NewBooking, NewConversation, NewMessage,
    NewNotification, NewTransaction, Notification, NotificationScope, NotificationTarget, Plan,
    Profile, RecordId, ServiceOffering, SiteSettings, Transaction, TransactionStatus,
};
use crate::preview::PreviewChannel;
use crate::store::{Position, StateStore, Stored};

/// Newest analytics events kept locally unless configured otherwise.
const DEFAULT_ANALYTICS_WINDOW: usize = 200;

/// Profile columns an admin bulk save writes.
const PROFILE_ADMIN_COLUMNS: &[&str] = &[
    "display_name",
    "phone",
    "role",
    "subscription_plan",
    "saved_vehicles",
    "saved_addresses",
];

pub struct WriteCoordinator {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<StateStore>,
    preview: Arc<PreviewChannel>,
    analytics_window: usize,
}

impl WriteCoordinator {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<StateStore>,
        preview: Arc<PreviewChannel>,
    ) -> Self {
        Self {
            gateway,
            store,
            preview,
            analytics_window: DEFAULT_ANALYTICS_WINDOW,
        }
    }

    pub fn with_analytics_window(mut self, window: usize) -> Self {
        self.analytics_window = window.max(1);
        self
    }

    // ── Optimistic primitives ────────────────────────────────────

    fn rollback<T: Stored>(&self, snapshot: Vec<T>, err: SyncError) -> SyncError {
        tracing::warn!(table = T::COLLECTION.table(), "Write failed, local change rolled back: {err}");
        self.store.replace(snapshot);
        err
    }

    /// Insert locally, then remotely; swap in the stored row.
    async fn create<T: Stored>(&self, item: T, position: Position) -> Result<T, SyncError> {
        let table = T::COLLECTION.table();
        let local_id = item.id().clone();
        let snapshot = self.store.items::<T>();
        self.store.insert(item.clone(), position);

        let row = match encode_for_insert(&item) {
            Ok(row) => row,
            Err(e) => return Err(self.rollback(snapshot, e)),
        };
        match self.gateway.insert(table, row).await {
            Ok(rows) => {
                let stored = authoritative(&rows, item);
                self.store.reconcile(&local_id, stored.clone());
                tracing::debug!(table, id = %stored.id(), "Record created");
                Ok(stored)
            }
            Err(e) => Err(self.rollback(snapshot, e.into())),
        }
    }

    /// Modify locally and push the whole record.
    async fn amend<T: Stored>(
        &self,
        id: &RecordId,
        f: impl FnOnce(&mut T),
    ) -> Result<T, SyncError> {
        let snapshot = self.store.items::<T>();
        let updated = self
            .store
            .modify(id, f)
            .ok_or_else(|| SyncError::not_found(T::COLLECTION, id))?;
        let row = match mapper::encode(&updated) {
            Ok(row) => row,
            Err(e) => return Err(self.rollback(snapshot, e)),
        };
        self.push_update(id, row, snapshot, updated).await
    }

    /// Modify locally and push only the given wire columns.
    async fn amend_fields<T: Stored>(
        &self,
        id: &RecordId,
        f: impl FnOnce(&mut T),
        fields: Value,
    ) -> Result<T, SyncError> {
        let snapshot = self.store.items::<T>();
        let updated = self
            .store
            .modify(id, f)
            .ok_or_else(|| SyncError::not_found(T::COLLECTION, id))?;
        self.push_update(id, fields, snapshot, updated).await
    }

    async fn push_update<T: Stored>(
        &self,
        id: &RecordId,
        patch: Value,
        snapshot: Vec<T>,
        updated: T,
    ) -> Result<T, SyncError> {
        let table = T::COLLECTION.table();
        match self.gateway.update(table, &Filter::by_id(id), patch).await {
            Ok(rows) if rows.is_empty() => {
                Err(self.rollback(snapshot, SyncError::not_found(T::COLLECTION, id)))
            }
            Ok(rows) => {
                let stored = authoritative(&rows, updated);
                self.store.replace_by_id(stored.clone());
                Ok(stored)
            }
            Err(e) => Err(self.rollback(snapshot, e.into())),
        }
    }

    /// Replace a whole collection locally, then upsert it.
    ///
    /// Records the server already knows and new ones (placeholder ids) go in
    /// separate requests, each with one column set for all of its rows.
    /// `columns` limits what is written; `id` is always kept.
    async fn bulk_save<T: Stored>(
        &self,
        items: Vec<T>,
        columns: Option<&[&str]>,
    ) -> Result<Vec<T>, SyncError> {
        let table = T::COLLECTION.table();
        let snapshot = self.store.items::<T>();
        self.store.replace(items.clone());

        let (fresh, known): (Vec<T>, Vec<T>) = items.into_iter().partition(|i| i.id().is_local());
        for group in [known, fresh] {
            if group.is_empty() {
                continue;
            }
            let rows: Result<Vec<Value>, SyncError> = group
                .iter()
                .map(|item| encode_for_insert(item).map(|row| project(row, columns)))
                .collect();
            let rows = match rows {
                Ok(rows) => uniform_rows(rows),
                Err(e) => return Err(self.rollback(snapshot, e)),
            };

            match self.gateway.upsert(table, rows).await {
                Ok(stored) => {
                    for (item, row) in group.iter().zip(&stored) {
                        match mapper::decode::<T>(row) {
                            Ok(saved) => self.store.reconcile(item.id(), saved),
                            Err(e) => tracing::warn!(table, "Upserted record could not be read back: {e}"),
                        }
                    }
                }
                Err(e) => return Err(self.rollback(snapshot, e.into())),
            }
        }
        Ok(self.store.items())
    }

    /// Remove locally, then remotely.
    async fn destroy<T: Stored>(&self, id: &RecordId) -> Result<(), SyncError> {
        let table = T::COLLECTION.table();
        let snapshot = self.store.items::<T>();
        self.store.remove::<T>(id);
        match self.gateway.delete(table, &Filter::by_id(id)).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.rollback(snapshot, e.into())),
        }
    }

    // ── Services ─────────────────────────────────────────────────

    pub async fn add_service(&self, mut service: ServiceOffering) -> Result<ServiceOffering, SyncError> {
        service.id = RecordId::local();
        self.create(service, Position::Back).await
    }

    pub async fn update_service(&self, service: ServiceOffering) -> Result<ServiceOffering, SyncError> {
        let id = service.id.clone();
        self.amend(&id, |s: &mut ServiceOffering| *s = service).await
    }

    pub async fn delete_service(&self, id: &RecordId) -> Result<(), SyncError> {
        self.destroy::<ServiceOffering>(id).await
    }

    // ── Plans ────────────────────────────────────────────────────

    pub async fn add_plan(&self, mut plan: Plan) -> Result<Plan, SyncError> {
        plan.id = RecordId::local();
        self.create(plan, Position::Back).await
    }

    pub async fn update_plan(&self, plan: Plan) -> Result<Plan, SyncError> {
        let id = plan.id.clone();
        self.amend(&id, |p: &mut Plan| *p = plan).await
    }

    pub async fn delete_plan(&self, id: &RecordId) -> Result<(), SyncError> {
        self.destroy::<Plan>(id).await
    }

    /// Replace the plan list locally and upsert every plan.
    ///
    /// Plans left out of `plans` are not deleted remotely.
    pub async fn update_plans(&self, plans: Vec<Plan>) -> Result<Vec<Plan>, SyncError> {
        self.bulk_save(plans, None).await
    }

    // ── Bookings ─────────────────────────────────────────────────

    /// Create a pending booking and raise a "New Booking Request" for the
    /// admins. The admin notification is best effort.
    pub async fn add_booking(&self, new: NewBooking) -> Result<Booking, SyncError> {
        let booking = new.into_booking(RecordId::generate("BK"));
        let stored = self.create(booking, Position::Front).await?;

        let request = NewNotification {
            kind: "booking".into(),
            title: "New Booking Request".into(),
            message: format!(
                "{} booked {} for {}",
                stored.full_name,
                stored.service.as_deref().unwrap_or("a service"),
                stored.date.as_deref().unwrap_or("an open date"),
            ),
        };
        if let Err(e) = self.add_notification(NotificationTarget::Admins, request).await {
            tracing::warn!(booking = %stored.id, "Admin booking notification failed: {e}");
        }
        Ok(stored)
    }

    /// Replace a booking. A status change is checked against the lifecycle
    /// and notifies the owner like [`Self::update_booking_status`].
    pub async fn update_booking(&self, booking: Booking) -> Result<Booking, SyncError> {
        let id = booking.id.clone();
        let current = self
            .store
            .get::<Booking>(&id)
            .ok_or_else(|| SyncError::not_found(Collection::Bookings, &id))?;
        check_booking_transition(&current, booking.status)?;

        let status_changed = current.status != booking.status;
        let updated = self.amend(&id, |b: &mut Booking| *b = booking).await?;
        if status_changed {
            self.notify_booking_owner(&updated).await;
        }
        Ok(updated)
    }

    /// Move a booking through its lifecycle. Approving or rejecting notifies
    /// the owner exactly once; the reason is stored and included on reject.
    /// Setting the current status again is a no-op.
    pub async fn update_booking_status(
        &self,
        id: &RecordId,
        status: BookingStatus,
        rejection_reason: Option<String>,
    ) -> Result<Booking, SyncError> {
        let current = self
            .store
            .get::<Booking>(id)
            .ok_or_else(|| SyncError::not_found(Collection::Bookings, id))?;
        if current.status == status {
            return Ok(current);
        }
        check_booking_transition(&current, status)?;

        let updated = self
            .amend(id, |b: &mut Booking| {
                b.status = status;
                if status == BookingStatus::Rejected && rejection_reason.is_some() {
                    b.rejection_reason = rejection_reason;
                }
            })
            .await?;
        self.notify_booking_owner(&updated).await;
        Ok(updated)
    }

    pub async fn delete_booking(&self, id: &RecordId) -> Result<(), SyncError> {
        self.destroy::<Booking>(id).await
    }

    async fn notify_booking_owner(&self, booking: &Booking) {
        if !booking.status.notifies_owner() {
            return;
        }
        let Some(owner) = booking.customer_id.clone() else {
            tracing::debug!(booking = %booking.id, "Booking has no owner, skipping notification");
            return;
        };

        let service = booking.service.as_deref().unwrap_or("your service");
        let date = booking.date.as_deref().unwrap_or("the requested date");
        let notification = match booking.status {
            BookingStatus::Rejected => NewNotification {
                kind: "booking".into(),
                title: "Booking Rejected".into(),
                message: format!(
                    "Your booking for {service} on {date} was rejected. Reason: {}",
                    booking
                        .rejection_reason
                        .as_deref()
                        .unwrap_or("no reason given")
                ),
            },
            _ => NewNotification {
                kind: "booking".into(),
                title: "Booking Approved".into(),
                message: format!("Your booking for {service} on {date} has been approved."),
            },
        };

        if let Err(e) = self
            .add_notification(NotificationTarget::User(owner), notification)
            .await
        {
            tracing::warn!(booking = %booking.id, "Owner notification failed: {e}");
        }
    }

    // ── Transactions ─────────────────────────────────────────────

    pub async fn add_transaction(&self, new: NewTransaction) -> Result<Transaction, SyncError> {
        let transaction = new.into_transaction(RecordId::generate("TRX"), now_rfc3339());
        self.create(transaction, Position::Front).await
    }

    pub async fn update_transaction(&self, transaction: Transaction) -> Result<Transaction, SyncError> {
        let id = transaction.id.clone();
        let current = self
            .store
            .get::<Transaction>(&id)
            .ok_or_else(|| SyncError::not_found(Collection::Transactions, &id))?;
        check_transaction_transition(&current, transaction.status)?;
        self.amend(&id, |t: &mut Transaction| *t = transaction).await
    }

    pub async fn update_transaction_status(
        &self,
        id: &RecordId,
        status: TransactionStatus,
    ) -> Result<Transaction, SyncError> {
        let current = self
            .store
            .get::<Transaction>(id)
            .ok_or_else(|| SyncError::not_found(Collection::Transactions, id))?;
        if current.status == status {
            return Ok(current);
        }
        check_transaction_transition(&current, status)?;
        self.amend_fields(
            id,
            |t: &mut Transaction| t.status = status,
            json!({ "status": status.as_str() }),
        )
        .await
    }

    pub async fn delete_transaction(&self, id: &RecordId) -> Result<(), SyncError> {
        self.destroy::<Transaction>(id).await
    }

    // ── Profiles ─────────────────────────────────────────────────

    /// Add a profile under the identity provider's user id.
    pub async fn add_profile(&self, profile: Profile) -> Result<Profile, SyncError> {
        self.create(profile, Position::Back).await
    }

    pub async fn update_profile(&self, profile: Profile) -> Result<Profile, SyncError> {
        let id = profile.id.clone();
        self.amend(&id, |p: &mut Profile| *p = profile).await
    }

    pub async fn delete_profile(&self, id: &RecordId) -> Result<(), SyncError> {
        self.destroy::<Profile>(id).await
    }

    /// Save the admin's edited user list. Only the account-management
    /// columns are written; contact details and everything else stay as
    /// the server has them.
    pub async fn update_profiles(&self, profiles: Vec<Profile>) -> Result<Vec<Profile>, SyncError> {
        self.bulk_save(profiles, Some(PROFILE_ADMIN_COLUMNS)).await
    }

    pub async fn update_user_subscription(
        &self,
        user_id: &RecordId,
        plan_name: &str,
    ) -> Result<Profile, SyncError> {
        self.amend_fields(
            user_id,
            |p: &mut Profile| p.subscription_plan = plan_name.to_string(),
            json!({ "subscription_plan": plan_name }),
        )
        .await
    }

    // ── Chat ─────────────────────────────────────────────────────

    pub async fn add_conversation(&self, new: NewConversation) -> Result<Conversation, SyncError> {
        let conversation = Conversation {
            id: RecordId::generate("conv"),
            customer_id: new.customer_id,
            customer_name: new.customer_name,
            last_message: new.last_message,
            last_message_time: new.last_message_time,
            extra: Map::new(),
        };
        self.create(conversation, Position::Front).await
    }

    /// Post a message, then refresh the conversation's last-message fields.
    /// The conversation refresh is best effort.
    pub async fn send_message(&self, new: NewMessage) -> Result<Message, SyncError> {
        let timestamp = new.timestamp.unwrap_or_else(now_rfc3339);
        let message = Message {
            id: RecordId::generate("msg"),
            conversation_id: new.conversation_id,
            sender: new.sender,
            text: new.text,
            timestamp: Some(timestamp.clone()),
            read: false,
            state: MessageState::Active,
            extra: Map::new(),
        };
        let stored = self.create(message, Position::Back).await?;

        let conversation_id = RecordId::from(stored.conversation_id.as_str());
        let text = stored.text.clone();
        let fields = json!({ "last_message": text, "last_message_time": timestamp });
        let preview = self
            .amend_fields(
                &conversation_id,
                |c: &mut Conversation| {
                    c.last_message = Some(text);
                    c.last_message_time = Some(timestamp);
                },
                fields,
            )
            .await;
        if let Err(e) = preview {
            tracing::warn!(conversation = %conversation_id, "Conversation preview not updated: {e}");
        }
        Ok(stored)
    }

    /// Change a message's text. Deleted messages cannot be edited.
    pub async fn edit_message(&self, id: &RecordId, text: &str) -> Result<Message, SyncError> {
        let current = self
            .store
            .get::<Message>(id)
            .ok_or_else(|| SyncError::not_found(Collection::Messages, id))?;
        if current.is_deleted() {
            return Err(SyncError::InvalidTransition {
                collection: Collection::Messages,
                id: id.clone(),
                from: "Deleted".into(),
                to: "Edited".into(),
            });
        }
        let at = now_rfc3339();
        self.amend(id, |m: &mut Message| {
            m.text = text.to_string();
            m.state = MessageState::Edited { at };
        })
        .await
    }

    /// Soft-delete a message; its text is retained.
    pub async fn delete_message(&self, id: &RecordId) -> Result<Message, SyncError> {
        let current = self
            .store
            .get::<Message>(id)
            .ok_or_else(|| SyncError::not_found(Collection::Messages, id))?;
        if current.is_deleted() {
            return Ok(current);
        }
        let at = now_rfc3339();
        self.amend(id, |m: &mut Message| m.state = MessageState::Deleted { at })
            .await
    }

    /// Mark every message of a conversation read. Returns how many changed
    /// locally.
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<usize, SyncError> {
        let snapshot = self.store.items::<Message>();
        let changed = self.store.modify_where(
            |m: &Message| m.conversation_id == conversation_id && !m.read,
            |m: &mut Message| m.read = true,
        );
        let filter = Filter::eq("conversation_id", conversation_id);
        match self
            .gateway
            .update(Collection::Messages.table(), &filter, json!({ "read": true }))
            .await
        {
            Ok(_) => Ok(changed),
            Err(e) => Err(self.rollback(snapshot, e.into())),
        }
    }

    // ── Notifications ────────────────────────────────────────────

    pub async fn add_notification(
        &self,
        target: NotificationTarget,
        new: NewNotification,
    ) -> Result<Notification, SyncError> {
        let notification = Notification {
            id: RecordId::local(),
            user_id: match target {
                NotificationTarget::Admins => None,
                NotificationTarget::User(id) => Some(id),
            },
            kind: Some(new.kind),
            title: Some(new.title),
            message: Some(new.message),
            timestamp: Some(now_rfc3339()),
            read: false,
            extra: Map::new(),
        };
        self.create(notification, Position::Front).await
    }

    pub async fn mark_notification_read(&self, id: &RecordId) -> Result<Notification, SyncError> {
        self.amend_fields(id, |n: &mut Notification| n.read = true, json!({ "read": true }))
            .await
    }

    pub async fn delete_notification(&self, id: &RecordId) -> Result<(), SyncError> {
        self.destroy::<Notification>(id).await
    }

    /// Delete every notification in `scope`. Returns how many were removed
    /// locally.
    pub async fn clear_notifications(&self, scope: NotificationScope) -> Result<usize, SyncError> {
        let snapshot = self.store.items::<Notification>();
        let removed = self.store.retain(|n: &Notification| !scope.covers(n));
        let filter = match &scope {
            NotificationScope::Admins => Filter::IsNull("user_id".into()),
            NotificationScope::User(id) => Filter::eq("user_id", id.as_str()),
            NotificationScope::AllUsers => Filter::NotNull("user_id".into()),
        };
        match self
            .gateway
            .delete(Collection::Notifications.table(), &filter)
            .await
        {
            Ok(()) => Ok(removed),
            Err(e) => Err(self.rollback(snapshot, e.into())),
        }
    }

    // ── Settings & preview ───────────────────────────────────────

    /// Edit the settings with a closure and persist the result.
    pub async fn update_settings(
        &self,
        f: impl FnOnce(&mut SiteSettings),
    ) -> Result<SiteSettings, SyncError> {
        let snapshot = self.store.settings();
        let updated = self.store.update_settings(f);
        self.persist_settings(snapshot, updated).await
    }

    /// Merge a partial internal-form object into the settings and persist.
    pub async fn patch_settings(&self, patch: &Value) -> Result<SiteSettings, SyncError> {
        let snapshot = self.store.settings();
        let patched = snapshot
            .with_patch(patch)
            .map_err(|e| SyncError::mapping(Collection::Configuration, e))?;
        self.store.set_settings(patched.clone());
        self.persist_settings(snapshot, patched).await
    }

    async fn persist_settings(
        &self,
        snapshot: SiteSettings,
        updated: SiteSettings,
    ) -> Result<SiteSettings, SyncError> {
        let mut row = mapper::to_wire(Collection::Configuration, &updated.to_value());
        if let Some(object) = row.as_object_mut() {
            object.insert("id".into(), Value::from(SETTINGS_ROW_ID));
        }
        match self
            .gateway
            .upsert(Collection::Configuration.table(), vec![row])
            .await
        {
            Ok(_) => Ok(updated),
            Err(e) => {
                let err = SyncError::from(e);
                tracing::warn!("Settings save failed, local change rolled back: {err}");
                self.store.set_settings(snapshot);
                Err(err)
            }
        }
    }

    /// Show a partial settings edit to every preview consumer without
    /// saving it.
    pub fn publish_preview_draft(&self, partial: &Value) -> bool {
        self.preview.publish_draft(partial)
    }

    /// Persist the current draft and clear it. Without a draft this returns
    /// the committed settings unchanged. The draft survives a failed save.
    pub async fn save_preview_draft(&self) -> Result<SiteSettings, SyncError> {
        let Some(draft) = self.preview.current_draft() else {
            return Ok(self.store.settings());
        };
        let saved = self.patch_settings(&draft).await?;
        self.preview.clear_draft();
        Ok(saved)
    }

    /// Bump the view counter locally and persist it in the background.
    /// Best effort: a lost increment is not reported.
    pub fn increment_view_counter(&self) -> JoinHandle<()> {
        let count = self.store.update_settings(|s| s.view_count += 1).view_count;
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let filter = Filter::eq("id", SETTINGS_ROW_ID);
            let patch = json!({ "view_count": count });
            if let Err(e) = gateway
                .update(Collection::Configuration.table(), &filter, patch)
                .await
            {
                tracing::debug!("View counter not persisted: {e}");
            }
        })
    }

    // ── Purge ────────────────────────────────────────────────────

    /// Delete every non-admin profile and all bookings, transactions,
    /// notifications, messages and conversations.
    ///
    /// The six remote deletes run concurrently. If any fails, all six local
    /// collections are restored and the first error is returned; deletes
    /// that already succeeded remotely show up again as missing on the next
    /// load or poll.
    pub async fn purge_non_administrative_data(&self) -> Result<(), SyncError> {
        let profiles = self.store.items::<Profile>();
        let bookings = self.store.items::<Booking>();
        let transactions = self.store.items::<Transaction>();
        let notifications = self.store.items::<Notification>();
        let messages = self.store.items::<Message>();
        let conversations = self.store.items::<Conversation>();

        self.store.retain(Profile::is_admin);
        self.store.replace(Vec::<Booking>::new());
        self.store.replace(Vec::<Transaction>::new());
        self.store.replace(Vec::<Notification>::new());
        self.store.replace(Vec::<Message>::new());
        self.store.replace(Vec::<Conversation>::new());

        let non_admin = Filter::neq("role", "admin");
        let every_row = Filter::All;
        let results: Vec<Result<(), GatewayError>> = futures_util::future::join_all([
            self.gateway.delete(Collection::Profiles.table(), &non_admin),
            self.gateway.delete(Collection::Bookings.table(), &every_row),
            self.gateway.delete(Collection::Transactions.table(), &every_row),
            self.gateway.delete(Collection::Notifications.table(), &every_row),
            self.gateway.delete(Collection::Messages.table(), &every_row),
            self.gateway.delete(Collection::Conversations.table(), &every_row),
        ])
        .await;

        let Some(err) = results.into_iter().find_map(Result::err) else {
            tracing::info!("Non-administrative data purged");
            return Ok(());
        };

        let err = SyncError::from(err);
        tracing::warn!("Purge failed, restoring local data: {err}");
        self.store.replace(profiles);
        self.store.replace(bookings);
        self.store.replace(transactions);
        self.store.replace(notifications);
        self.store.replace(messages);
        self.store.replace(conversations);
        Err(err)
    }

    // ── Append-only logs ─────────────────────────────────────────

    pub async fn add_broadcast(&self, mut broadcast: Broadcast) -> Result<Broadcast, SyncError> {
        broadcast.id = RecordId::local();
        broadcast.created_at.get_or_insert_with(now_rfc3339);
        self.create(broadcast, Position::Front).await
    }

    /// Record an analytics event; the local list stays capped at the
    /// analytics window, newest first.
    pub async fn log_analytics_event(
        &self,
        mut event: AnalyticsEvent,
    ) -> Result<AnalyticsEvent, SyncError> {
        event.id = RecordId::local();
        event.created_at.get_or_insert_with(now_rfc3339);
        let stored = self.create(event, Position::Front).await?;
        self.store.truncate::<AnalyticsEvent>(self.analytics_window);
        Ok(stored)
    }

    pub async fn log_data_export(&self, mut log: DataExportLog) -> Result<DataExportLog, SyncError> {
        log.id = RecordId::local();
        log.created_at.get_or_insert_with(now_rfc3339);
        self.create(log, Position::Front).await
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Wire row for an insert; placeholder ids are left for the server to fill.
fn encode_for_insert<T: Entity>(item: &T) -> Result<Value, SyncError> {
    let mut row = mapper::encode(item)?;
    if item.id().is_local() {
        if let Some(object) = row.as_object_mut() {
            object.remove("id");
        }
    }
    Ok(row)
}

/// Keep only `columns` (and `id`) of a wire row; `None` keeps everything.
fn project(row: Value, columns: Option<&[&str]>) -> Value {
    match (row, columns) {
        (Value::Object(object), Some(columns)) => Value::Object(
            object
                .into_iter()
                .filter(|(key, _)| key == "id" || columns.contains(&key.as_str()))
                .collect(),
        ),
        (row, _) => row,
    }
}

/// Give every row the same columns, writing null where a row had none.
fn uniform_rows(mut rows: Vec<Value>) -> Vec<Value> {
    let columns: BTreeSet<String> = rows
        .iter()
        .filter_map(Value::as_object)
        .flat_map(|o| o.keys().cloned())
        .collect();
    for row in &mut rows {
        if let Some(object) = row.as_object_mut() {
            for column in &columns {
                object.entry(column.clone()).or_insert(Value::Null);
            }
        }
    }
    rows
}

/// The server's version of a written record, or `fallback` when the
/// response carried none (or an unreadable one).
fn authoritative<T: Entity>(rows: &[Value], fallback: T) -> T {
    match rows.first().map(mapper::decode::<T>) {
        Some(Ok(stored)) => stored,
        Some(Err(e)) => {
            tracing::warn!(table = T::COLLECTION.table(), "Server row unreadable, keeping local copy: {e}");
            fallback
        }
        None => fallback,
    }
}

fn check_booking_transition(current: &Booking, next: BookingStatus) -> Result<(), SyncError> {
    if current.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition {
            collection: Collection::Bookings,
            id: current.id.clone(),
            from: current.status.to_string(),
            to: next.to_string(),
        })
    }
}

fn check_transaction_transition(
    current: &Transaction,
    next: TransactionStatus,
) -> Result<(), SyncError> {
    if current.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition {
            collection: Collection::Transactions,
            id: current.id.clone(),
            from: current.status.to_string(),
            to: next.to_string(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
