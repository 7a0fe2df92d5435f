use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::enums::{MessageRole, MessageStatus};

/// A single turn within a quiz, from the user or the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Client-generated, immutable.
    pub id: Uuid,
    /// Parent quiz. A message never changes its parent.
    pub quiz_id: Uuid,
    pub role: MessageRole,
    /// Grows incrementally for model messages during streaming; fixed for
    /// user messages.
    pub content: String,
    /// Set once at creation; the ordering key within a quiz (ties broken
    /// by id).
    pub created_at: DateTime<Utc>,
    /// Only meaningful for model messages; user messages are always done.
    pub status: MessageStatus,
    pub synced: bool,
}

impl ChatMessage {
    /// A finished user turn.
    pub fn user(quiz_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            role: MessageRole::User,
            content: content.into(),
            created_at: Utc::now(),
            status: MessageStatus::Done,
            synced: false,
        }
    }

    /// The empty model placeholder created the instant a generation is
    /// requested, before any token arrives.
    pub fn placeholder(quiz_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            role: MessageRole::Model,
            content: String::new(),
            created_at: Utc::now(),
            status: MessageStatus::Waiting,
            synced: false,
        }
    }
}
