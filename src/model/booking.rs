//! Bookings and the payment ledger.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::{impl_entity, lenient_number, Collection, RecordId};

// ── Booking lifecycle ────────────────────────────────────────────

/// Booking lifecycle.
///
/// ```text
/// Pending ──▶ Approved ──▶ Completed
///    │  ╲         │
///    │   ▶ Rejected
///    ▼            ▼
/// Cancelled ◀─────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    #[default]
    Pending,
    #[serde(alias = "Confirmed")]
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Whether moving from `self` to `next` is allowed. Staying in the same
    /// state is always allowed (and is a no-op for callers).
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        self == next
            || matches!(
                (self, next),
                (Pending, Approved)
                    | (Pending, Rejected)
                    | (Pending, Cancelled)
                    | (Approved, Completed)
                    | (Approved, Cancelled)
            )
    }

    /// Entering this state notifies the booking's owner.
    pub fn notifies_owner(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detailing appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: RecordId,
    /// Owning profile, absent for walk-in bookings entered by staff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default = "default_customer_name")]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price: f64,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(Booking, Collection::Bookings);

fn default_customer_name() -> String {
    "Customer".into()
}

/// Caller-supplied fields for a new booking; id and status are assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewBooking {
    pub customer_id: Option<String>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub service: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub vehicle_type: Option<String>,
    pub price: f64,
}

impl NewBooking {
    pub(crate) fn into_booking(self, id: RecordId) -> Booking {
        Booking {
            id,
            customer_id: self.customer_id,
            full_name: if self.full_name.trim().is_empty() {
                default_customer_name()
            } else {
                self.full_name
            },
            email: self.email,
            phone: self.phone,
            service: self.service,
            date: self.date,
            time: self.time,
            location: self.location,
            vehicle_type: self.vehicle_type,
            price: self.price,
            status: BookingStatus::Pending,
            rejection_reason: None,
            extra: Map::new(),
        }
    }
}

// ── Transactions ─────────────────────────────────────────────────

/// Ledger entry lifecycle. There is no automatic reversal: once settled or
/// denied an entry stays that way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Paid,
    /// Payment reference could not be verified.
    #[serde(alias = "Rejected")]
    Denied,
}

impl TransactionStatus {
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self == next
            || (self == Self::Pending && matches!(next, Self::Completed | Self::Paid | Self::Denied))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Completed => "Completed",
            Self::Paid => "Paid",
            Self::Denied => "Denied",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment record tied to a booking or a plan purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Payer display name.
    #[serde(default = "default_payer")]
    pub user: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub amount: f64,
    #[serde(default)]
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(Transaction, Collection::Transactions);

fn default_payer() -> String {
    "Guest".into()
}

/// Caller-supplied fields for a new ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewTransaction {
    pub booking_id: Option<String>,
    pub plan_id: Option<String>,
    pub user_id: Option<String>,
    pub user: Option<String>,
    pub amount: f64,
    pub status: TransactionStatus,
    pub payment_method: Option<String>,
    pub reference_no: Option<String>,
}

impl NewTransaction {
    pub(crate) fn into_transaction(self, id: RecordId, date: String) -> Transaction {
        Transaction {
            id,
            booking_id: self.booking_id,
            plan_id: self.plan_id,
            user_id: self.user_id,
            user: self.user.unwrap_or_else(default_payer),
            amount: self.amount,
            status: self.status,
            payment_method: self.payment_method,
            reference_no: self.reference_no,
            date: Some(date),
            extra: Map::new(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booking_transitions_follow_lifecycle() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Completed));
        assert!(Approved.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Pending));

        assert!(!Completed.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Cancelled.can_transition_to(Approved));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn only_decisions_notify_owner() {
        assert!(BookingStatus::Approved.notifies_owner());
        assert!(BookingStatus::Rejected.notifies_owner());
        assert!(!BookingStatus::Completed.notifies_owner());
        assert!(!BookingStatus::Cancelled.notifies_owner());
    }

    #[test]
    fn confirmed_reads_as_approved() {
        let status: BookingStatus = serde_json::from_value(json!("Confirmed")).unwrap();
        assert_eq!(status, BookingStatus::Approved);
    }

    #[test]
    fn booking_decodes_partial_internal_row() {
        let booking: Booking = serde_json::from_value(json!({
            "id": "BK-1",
            "price": "$45",
            "surcharge": 5
        }))
        .unwrap();
        assert_eq!(booking.full_name, "Customer");
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!((booking.price - 45.0).abs() < f64::EPSILON);
        assert_eq!(booking.extra.get("surcharge"), Some(&json!(5)));
    }

    #[test]
    fn transactions_never_reverse() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Denied));
        assert!(!Denied.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Paid));
    }

    #[test]
    fn blank_booking_name_falls_back() {
        let booking = NewBooking::default().into_booking(RecordId::from("BK-2"));
        assert_eq!(booking.full_name, "Customer");
        assert_eq!(booking.status, BookingStatus::Pending);
    }
}
