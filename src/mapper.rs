//! Wire ↔ internal record translation.
//!
//! The remote tables are flat and snake_case; in memory records are
//! camelCase and, for the settings singleton, grouped into nested objects.
//! All of that renaming lives here and nowhere else.
//!
//! ## Design
//! - One static field table per collection: every known wire column maps to
//!   exactly one internal path (`primary_color` ↔ `colors.primary`)
//! - Unknown columns pass through untouched in both directions
//! - Absent or null wire fields take the per-table fallback when one is
//!   declared; mapping itself never fails
//! - Typed decoding into [`Entity`] values is a separate step and is the
//!   only place a malformed record is detected

use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::model::{Collection, Entity};

// ── Field tables ─────────────────────────────────────────────────

/// Value used when a wire field is absent or null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    None,
    Text(&'static str),
    Zero,
    False,
    EmptyList,
}

impl Fallback {
    fn value(self) -> Option<Value> {
        match self {
            Self::None => None,
            Self::Text(s) => Some(Value::from(s)),
            Self::Zero => Some(Value::from(0)),
            Self::False => Some(Value::Bool(false)),
            Self::EmptyList => Some(Value::Array(Vec::new())),
        }
    }
}

/// One wire column and where it lives in the internal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub wire: &'static str,
    /// Dotted internal path (`contact.socials.instagram`).
    pub internal: &'static str,
    pub fallback: Fallback,
}

const fn field(wire: &'static str, internal: &'static str) -> FieldSpec {
    FieldSpec {
        wire,
        internal,
        fallback: Fallback::None,
    }
}

const fn with_default(wire: &'static str, internal: &'static str, fallback: Fallback) -> FieldSpec {
    FieldSpec {
        wire,
        internal,
        fallback,
    }
}

const SETTINGS_FIELDS: &[FieldSpec] = &[
    field("site_name", "siteName"),
    field("legal_text", "legalText"),
    field("show_legal", "showLegal"),
    field("primary_color", "colors.primary"),
    field("secondary_color", "colors.secondary"),
    field("accent_color", "colors.accent"),
    field("phone", "contact.phone"),
    field("email", "contact.email"),
    field("hours", "contact.hours"),
    field("address", "contact.address"),
    field("google_map_link", "contact.googleMapLink"),
    field("instagram", "contact.socials.instagram"),
    field("facebook", "contact.socials.facebook"),
    field("twitter", "contact.socials.twitter"),
    field("linkedin", "contact.socials.linkedin"),
    field("seo_title", "seo.title"),
    field("seo_description", "seo.description"),
    field("landing_images", "landingImages"),
    field("payment_gateways", "paymentGateways"),
    field("footer_sections", "footerSections"),
    with_default("view_count", "viewCount", Fallback::Zero),
];

const SERVICE_FIELDS: &[FieldSpec] = &[
    with_default("price", "price", Fallback::Zero),
    with_default("features", "features", Fallback::EmptyList),
];

const PLAN_FIELDS: &[FieldSpec] = &[
    with_default("price", "price", Fallback::Zero),
    with_default("features", "features", Fallback::EmptyList),
    with_default("included_services", "includedServices", Fallback::EmptyList),
    with_default("active_users", "activeUsers", Fallback::Zero),
];

const PROFILE_FIELDS: &[FieldSpec] = &[
    with_default("display_name", "name", Fallback::Text("Anonymous")),
    with_default("role", "role", Fallback::Text("user")),
    with_default("saved_vehicles", "savedVehicles", Fallback::EmptyList),
    with_default("saved_addresses", "savedAddresses", Fallback::EmptyList),
    with_default("subscription_plan", "subscriptionPlan", Fallback::Text("None")),
    with_default("requests", "requests", Fallback::EmptyList),
];

const BOOKING_FIELDS: &[FieldSpec] = &[
    field("customer_id", "customerId"),
    with_default("full_name", "fullName", Fallback::Text("Customer")),
    field("vehicle_type", "vehicleType"),
    field("rejection_reason", "rejectionReason"),
    with_default("status", "status", Fallback::Text("Pending")),
    with_default("price", "price", Fallback::Zero),
];

const TRANSACTION_FIELDS: &[FieldSpec] = &[
    field("booking_id", "bookingId"),
    field("plan_id", "planId"),
    field("user_id", "userId"),
    with_default("user_name", "user", Fallback::Text("Guest")),
    with_default("amount", "amount", Fallback::Zero),
    with_default("status", "status", Fallback::Text("Pending")),
    field("payment_method", "paymentMethod"),
    field("reference_no", "referenceNo"),
];

const CONVERSATION_FIELDS: &[FieldSpec] = &[
    field("customer_id", "customerId"),
    field("customer_name", "customerName"),
    field("last_message", "lastMessage"),
    field("last_message_time", "lastMessageTime"),
];

const MESSAGE_FIELDS: &[FieldSpec] = &[
    with_default("conversation_id", "conversationId", Fallback::Text("")),
    with_default("read", "read", Fallback::False),
    with_default("edited", "edited", Fallback::False),
    field("edited_at", "editedAt"),
    with_default("deleted", "deleted", Fallback::False),
    field("deleted_at", "deletedAt"),
];

const NOTIFICATION_FIELDS: &[FieldSpec] = &[
    field("user_id", "userId"),
    with_default("read", "read", Fallback::False),
];

const BROADCAST_FIELDS: &[FieldSpec] = &[field("created_at", "createdAt")];

const ANALYTICS_FIELDS: &[FieldSpec] = &[
    field("event_type", "eventType"),
    field("user_id", "userId"),
    field("created_at", "createdAt"),
];

const EXPORT_FIELDS: &[FieldSpec] = &[
    field("export_type", "exportType"),
    with_default("record_count", "recordCount", Fallback::Zero),
    field("created_at", "createdAt"),
];

/// Field table for a collection.
pub fn fields(collection: Collection) -> &'static [FieldSpec] {
    match collection {
        Collection::Configuration => SETTINGS_FIELDS,
        Collection::ServiceOfferings => SERVICE_FIELDS,
        Collection::Plans => PLAN_FIELDS,
        Collection::Profiles => PROFILE_FIELDS,
        Collection::Bookings => BOOKING_FIELDS,
        Collection::Transactions => TRANSACTION_FIELDS,
        Collection::Conversations => CONVERSATION_FIELDS,
        Collection::Messages => MESSAGE_FIELDS,
        Collection::Notifications => NOTIFICATION_FIELDS,
        Collection::Broadcasts => BROADCAST_FIELDS,
        Collection::AnalyticsEvents => ANALYTICS_FIELDS,
        Collection::ExportLogs => EXPORT_FIELDS,
    }
}

// ── Translation ──────────────────────────────────────────────────

/// Convert a wire row into internal form.
///
/// A non-object input yields an object holding only the declared defaults.
pub fn to_internal(collection: Collection, wire: &Value) -> Value {
    let specs = fields(collection);
    let mut out = Map::new();
    let row = wire.as_object();

    // Unknown columns first so a mapped path always wins a name clash.
    if let Some(row) = row {
        for (key, value) in row {
            if !specs.iter().any(|s| s.wire == key) {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    for spec in specs {
        let value = row
            .and_then(|r| r.get(spec.wire))
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| spec.fallback.value());
        if let Some(value) = value {
            set_path(&mut out, spec.internal, value);
        }
    }

    Value::Object(out)
}

/// Convert an internal-form record back into a wire row.
///
/// Every mapped path is consumed (nested groups left empty are dropped);
/// everything else is passed through as-is. Null values are not written.
pub fn to_wire(collection: Collection, internal: &Value) -> Value {
    let Some(record) = internal.as_object() else {
        return Value::Object(Map::new());
    };
    let mut rest = record.clone();
    let mut out = Map::new();

    for spec in fields(collection) {
        if let Some(value) = take_path(&mut rest, spec.internal) {
            if !value.is_null() {
                out.insert(spec.wire.to_string(), value);
            }
        }
    }

    for (key, value) in rest {
        out.entry(key).or_insert(value);
    }
    Value::Object(out)
}

/// Map and decode one wire row.
pub fn decode<T: Entity>(wire: &Value) -> Result<T, SyncError> {
    let internal = to_internal(T::COLLECTION, wire);
    serde_json::from_value(internal).map_err(|e| SyncError::mapping(T::COLLECTION, e))
}

/// Encode an entity as a wire row.
pub fn encode<T: Entity>(entity: &T) -> Result<Value, SyncError> {
    let internal =
        serde_json::to_value(entity).map_err(|e| SyncError::mapping(T::COLLECTION, e))?;
    Ok(to_wire(T::COLLECTION, &internal))
}

/// Decode a batch of wire rows, skipping (and logging) malformed ones.
///
/// Returns the decoded records and the number skipped.
pub fn decode_rows<T: Entity>(rows: &[Value]) -> (Vec<T>, usize) {
    let mut decoded = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match decode::<T>(row) {
            Ok(entity) => decoded.push(entity),
            Err(e) => {
                skipped += 1;
                tracing::warn!(table = T::COLLECTION.table(), "Skipping record: {e}");
            }
        }
    }
    (decoded, skipped)
}

// ── Path helpers ─────────────────────────────────────────────────

fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                set_path(child, tail, value);
            }
        }
    }
}

fn take_path(target: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => target.remove(path),
        Some((head, tail)) => {
            let child = target.get_mut(head)?.as_object_mut()?;
            let taken = take_path(child, tail);
            if child.is_empty() {
                target.remove(head);
            }
            taken
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
