//! Domain records held in the state store.
//!
//! Every entity is decoded from the *internal* (camelCase, nested) form
//! produced by [`crate::mapper`], never directly from wire rows. Fields the
//! crate does not know about are kept in an `extra` map so that writing a
//! record back never drops columns added on the remote side.
//!
//! ## Design
//! - Identifiers are [`RecordId`]s: text or integer, preserved in their
//!   original wire type so filters and round-trips stay exact
//! - Entities reference each other by id only (booking → profile,
//!   message → conversation, transaction → booking)
//! - Lifecycles with rules (bookings, transactions, message edits) are enums,
//!   not loose strings or boolean pairs

pub mod booking;
pub mod chat;
pub mod records;
pub mod settings;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub use booking::{Booking, BookingStatus, NewBooking, NewTransaction, Transaction, TransactionStatus};
pub use chat::{Conversation, Message, MessageState, NewConversation, NewMessage};
pub use records::{
    AnalyticsEvent, Broadcast, DataExportLog, NewNotification, Notification, NotificationScope,
    NotificationTarget, Plan, Profile, Role, ServiceOffering,
};
pub use settings::{deep_merge, PaymentGateway, SiteSettings};

// ── Identifiers ──────────────────────────────────────────────────

/// Stable record identifier.
///
/// The remote store mixes client-generated text ids (`BK-…`, `msg-…`) with
/// server-generated integer ids (notifications, broadcasts). Both are kept
/// in their original type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Prefix used for placeholder ids of optimistic inserts whose real id
    /// is assigned by the server.
    pub const LOCAL_PREFIX: &'static str = "local-";

    /// Fresh placeholder id for a row the server will number.
    pub fn local() -> Self {
        Self::Text(format!("{}{}", Self::LOCAL_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Fresh client-assigned id with a human-readable prefix (`BK`, `TRX`, …).
    pub fn generate(prefix: &str) -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self::Text(format!("{prefix}-{}", raw[..10].to_uppercase()))
    }

    /// Whether this id is an optimistic placeholder.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Text(s) if s.starts_with(Self::LOCAL_PREFIX))
    }

    /// Wire value for filters and payloads.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }

    /// Read the `id` field of a wire or internal row.
    pub fn from_row(row: &serde_json::Value) -> Option<Self> {
        match row.get("id")? {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

// ── Collections ──────────────────────────────────────────────────

/// Every collection the state store knows about, with its remote table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Configuration,
    ServiceOfferings,
    Plans,
    Profiles,
    Bookings,
    Transactions,
    Conversations,
    Messages,
    Notifications,
    Broadcasts,
    AnalyticsEvents,
    ExportLogs,
}

impl Collection {
    /// All collections in bulk-load order.
    pub const ALL: [Collection; 12] = [
        Collection::Configuration,
        Collection::ServiceOfferings,
        Collection::Plans,
        Collection::Profiles,
        Collection::Bookings,
        Collection::Transactions,
        Collection::Conversations,
        Collection::Messages,
        Collection::Notifications,
        Collection::Broadcasts,
        Collection::AnalyticsEvents,
        Collection::ExportLogs,
    ];

    /// Remote table name.
    pub fn table(self) -> &'static str {
        match self {
            Self::Configuration => "site_settings",
            Self::ServiceOfferings => "services",
            Self::Plans => "plans",
            Self::Profiles => "profiles",
            Self::Bookings => "bookings",
            Self::Transactions => "transactions",
            Self::Conversations => "conversations",
            Self::Messages => "messages",
            Self::Notifications => "notifications",
            Self::Broadcasts => "broadcasts",
            Self::AnalyticsEvents => "analytics_events",
            Self::ExportLogs => "data_exports",
        }
    }

    /// Reverse lookup from a remote table name.
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.table() == table)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

// ── Entity trait ─────────────────────────────────────────────────

/// A record type stored as an ordered collection.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Collection this entity lives in.
    const COLLECTION: Collection;

    fn id(&self) -> &RecordId;

    /// Replace the id (used when an optimistic placeholder is swapped out).
    fn set_id(&mut self, id: RecordId);
}

/// Implements [`Entity`] for a struct with a `pub id: RecordId` field.
macro_rules! impl_entity {
    ($ty:ty, $collection:expr) => {
        impl $crate::model::Entity for $ty {
            const COLLECTION: $crate::model::Collection = $collection;

            fn id(&self) -> &$crate::model::RecordId {
                &self.id
            }

            fn set_id(&mut self, id: $crate::model::RecordId) {
                self.id = id;
            }
        }
    };
}
pub(crate) use impl_entity;

// ── Lenient decoding helpers ─────────────────────────────────────

/// Accept numbers, numeric strings (`"45"`, `"$45.00"`) and null for money
/// and counter fields. Anything unparseable reads as zero.
pub(crate) fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().unwrap_or(0.0)
        }
        _ => 0.0,
    })
}

/// Same as [`lenient_number`] for non-negative counters.
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = lenient_number(deserializer)?;
    Ok(if n.is_finite() && n > 0.0 { n as u64 } else { 0 })
}

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// Current time as an RFC 3339 string, the format every timestamp column uses.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Tests ────────────────────────────────────────────────────────
