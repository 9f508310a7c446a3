//! Catalog, profiles, notifications and append-only audit records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{impl_entity, lenient_count, lenient_number, Collection, RecordId};

// ── Catalog ──────────────────────────────────────────────────────

/// A service on the public menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOffering {
    pub id: RecordId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    /// Media reference (URL or storage path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(ServiceOffering, Collection::ServiceOfferings);

/// Subscription or one-time package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: RecordId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    /// Ids of service offerings bundled in this plan.
    #[serde(default)]
    pub included_services: Vec<RecordId>,
    /// Derived usage counter maintained by the backend.
    #[serde(default, deserialize_with = "lenient_count")]
    pub active_users: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(Plan, Collection::Plans);

// ── Profiles ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// One per registered account. Created by the identity provider's signup
/// flow; the id is the identity provider's user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: RecordId,
    #[serde(default = "default_display_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub saved_vehicles: Vec<Value>,
    #[serde(default)]
    pub saved_addresses: Vec<Value>,
    #[serde(default = "default_plan")]
    pub subscription_plan: String,
    #[serde(default)]
    pub requests: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(Profile, Collection::Profiles);

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn default_display_name() -> String {
    "Anonymous".into()
}

fn default_plan() -> String {
    "None".into()
}

// ── Notifications ────────────────────────────────────────────────

/// An inbox entry. `user_id == None` addresses every administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(Notification, Collection::Notifications);

impl Notification {
    pub fn is_for_admins(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Who a new notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    Admins,
    User(String),
}

/// Which notifications a bulk clear removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationScope {
    /// Every admin-wide notification.
    Admins,
    /// Every notification addressed to one user.
    User(String),
    /// Every user-targeted notification, across all users.
    AllUsers,
}

impl NotificationScope {
    pub fn covers(&self, notification: &Notification) -> bool {
        match self {
            Self::Admins => notification.user_id.is_none(),
            Self::User(id) => notification.user_id.as_deref() == Some(id.as_str()),
            Self::AllUsers => notification.user_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNotification {
    pub kind: String,
    pub title: String,
    pub message: String,
}

// ── Append-only records ──────────────────────────────────────────

/// An announcement pushed to customers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(Broadcast, Collection::Broadcasts);

/// A page view or interaction recorded for the admin analytics panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(AnalyticsEvent, Collection::AnalyticsEvents);

/// Audit trail of admin data exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataExportLog {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(DataExportLog, Collection::ExportLogs);

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profile_defaults_fill_missing_fields() {
        let profile: Profile = serde_json::from_value(json!({"id": "u-1"})).unwrap();
        assert_eq!(profile.name, "Anonymous");
        assert_eq!(profile.role, Role::User);
        assert_eq!(profile.subscription_plan, "None");
        assert!(profile.saved_vehicles.is_empty());
        assert!(!profile.is_admin());
    }

    #[test]
    fn notification_type_field_maps_to_kind() {
        let n: Notification =
            serde_json::from_value(json!({"id": 3, "type": "booking", "read": true})).unwrap();
        assert_eq!(n.kind.as_deref(), Some("booking"));
        assert!(n.is_for_admins());
        assert_eq!(serde_json::to_value(&n).unwrap()["type"], json!("booking"));
    }

    #[test]
    fn scopes_select_the_right_notifications() {
        let admin: Notification = serde_json::from_value(json!({"id": 1})).unwrap();
        let user: Notification =
            serde_json::from_value(json!({"id": 2, "userId": "u-1"})).unwrap();

        assert!(NotificationScope::Admins.covers(&admin));
        assert!(!NotificationScope::Admins.covers(&user));
        assert!(NotificationScope::User("u-1".into()).covers(&user));
        assert!(!NotificationScope::User("u-2".into()).covers(&user));
        assert!(NotificationScope::AllUsers.covers(&user));
        assert!(!NotificationScope::AllUsers.covers(&admin));
    }

    #[test]
    fn plan_counter_accepts_strings() {
        let plan: Plan =
            serde_json::from_value(json!({"id": 1, "activeUsers": "12", "price": 99})).unwrap();
        assert_eq!(plan.active_users, 12);
        assert!((plan.price - 99.0).abs() < f64::EPSILON);
    }
}
