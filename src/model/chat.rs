//! Support conversations and their messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{impl_entity, is_false, Collection, RecordId};

/// One support thread per customer, with denormalized last-message fields
/// for list display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_entity!(Conversation, Collection::Conversations);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewConversation {
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
}

/// Edit/delete state of a message. Content is always retained; a deleted
/// message cannot be edited afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageState {
    #[default]
    Active,
    Edited { at: String },
    Deleted { at: String },
}

/// A chat message. Belongs to exactly one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MessageRow", into = "MessageRow")]
pub struct Message {
    pub id: RecordId,
    pub conversation_id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: Option<String>,
    pub read: bool,
    pub state: MessageState,
    pub extra: Map<String, Value>,
}

impl_entity!(Message, Collection::Messages);

impl Message {
    pub fn is_deleted(&self) -> bool {
        matches!(self.state, MessageState::Deleted { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender: String,
    pub text: String,
    /// Defaults to the current time.
    pub timestamp: Option<String>,
}

/// Flag-pair shape used by the internal form (`edited`/`editedAt`,
/// `deleted`/`deletedAt`).
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRow {
    id: RecordId,
    #[serde(default)]
    conversation_id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(default)]
    read: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    edited_at: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let fallback = || row.timestamp.clone().unwrap_or_default();
        // Deleted wins over edited: a row carrying both flags was edited first.
        let state = if row.deleted {
            MessageState::Deleted {
                at: row.deleted_at.clone().unwrap_or_else(fallback),
            }
        } else if row.edited {
            MessageState::Edited {
                at: row.edited_at.clone().unwrap_or_else(fallback),
            }
        } else {
            MessageState::Active
        };

        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender: row.sender,
            text: row.text,
            timestamp: row.timestamp,
            read: row.read,
            state,
            extra: row.extra,
        }
    }
}

impl From<Message> for MessageRow {
    fn from(message: Message) -> Self {
        let (edited, edited_at, deleted, deleted_at) = match message.state {
            MessageState::Active => (false, None, false, None),
            MessageState::Edited { at } => (true, Some(at), false, None),
            MessageState::Deleted { at } => (false, None, true, Some(at)),
        };
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender: message.sender,
            text: message.text,
            timestamp: message.timestamp,
            read: message.read,
            edited,
            edited_at,
            deleted,
            deleted_at,
            extra: message.extra,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_decode_into_state() {
        let active: Message = serde_json::from_value(json!({"id": "m1", "text": "hi"})).unwrap();
        assert_eq!(active.state, MessageState::Active);

        let edited: Message = serde_json::from_value(json!({
            "id": "m2", "text": "fixed", "edited": true, "editedAt": "2026-01-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(
            edited.state,
            MessageState::Edited { at: "2026-01-01T10:00:00Z".into() }
        );
    }

    #[test]
    fn deleted_wins_over_edited() {
        let message: Message = serde_json::from_value(json!({
            "id": "m3",
            "text": "kept",
            "edited": true,
            "editedAt": "t1",
            "deleted": true,
            "deletedAt": "t2"
        }))
        .unwrap();
        assert_eq!(message.state, MessageState::Deleted { at: "t2".into() });
        assert_eq!(message.text, "kept");
        assert!(message.is_deleted());
    }

    #[test]
    fn state_encodes_back_to_flags() {
        let message = Message {
            id: RecordId::from("m4"),
            conversation_id: "c1".into(),
            sender: "admin".into(),
            text: "hello".into(),
            timestamp: Some("t0".into()),
            read: false,
            state: MessageState::Deleted { at: "t9".into() },
            extra: Map::new(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["deleted"], json!(true));
        assert_eq!(value["deletedAt"], json!("t9"));
        assert!(value.get("edited").is_none());
    }

    #[test]
    fn missing_timestamps_fall_back_to_message_time() {
        let message: Message = serde_json::from_value(json!({
            "id": "m5", "timestamp": "t0", "edited": true
        }))
        .unwrap();
        assert_eq!(message.state, MessageState::Edited { at: "t0".into() });
    }
}
