//! The remote store boundary: a thin RPC-call gateway to the server-side
//! store. Physically split into several endpoints, treated as one logical
//! unit. Every call may fail independently; there are no retries in here.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ChatMessage, MessageRole, MessageStatus, Ownership, Quiz, QuizStatus, UserProfile,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    /// The caller does not own the record (or its parent). Permanent for
    /// this record within a sync pass; not retried.
    #[error("not authorized for this record")]
    Unauthorized,
    #[error("server rejected request: HTTP {status}")]
    Status { status: u16, body: String },
    #[error("malformed server response: {0}")]
    Decode(String),
}

// ── Wire payloads ───────────────────────────────────────────
//
// The server only knows ids, timestamps and ownership; lifecycle flags
// (`status`, `synced`) are client-side state and stay off the wire.
// Anything the server completed comes back `done` by definition.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteQuiz {
    pub id: Uuid,
    pub title: String,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One quiz with its messages embedded, for full rehydration of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteQuizDetail {
    pub quiz: RemoteQuiz,
    pub messages: Vec<RemoteMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUserData {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
}

impl RemoteQuiz {
    pub fn from_local(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id,
            title: quiz.title.clone(),
            owner_id: quiz.owner.as_column().map(String::from),
            created_at: quiz.created_at,
            updated_at: quiz.updated_at,
            last_message_at: quiz.last_message_at,
        }
    }

    /// A downloaded quiz entering the local store: resolved and synced.
    pub fn into_local(self) -> Quiz {
        Quiz {
            id: self.id,
            title: self.title,
            owner: Ownership::from_column(self.owner_id),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_message_at: self.last_message_at,
            status: QuizStatus::Done,
            synced: true,
        }
    }
}

impl RemoteMessage {
    pub fn from_local(msg: &ChatMessage) -> Self {
        Self {
            id: msg.id,
            quiz_id: msg.quiz_id,
            role: msg.role,
            content: msg.content.clone(),
            created_at: msg.created_at,
        }
    }

    /// A downloaded message entering the local store: resolved and synced.
    pub fn into_local(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            quiz_id: self.quiz_id,
            role: self.role,
            content: self.content,
            created_at: self.created_at,
            status: MessageStatus::Done,
            synced: true,
        }
    }
}

impl RemoteUserData {
    pub fn into_profile(self, synced_at: DateTime<Utc>) -> UserProfile {
        UserProfile {
            id: self.id,
            display_name: self.display_name,
            email: self.email,
            synced_at,
        }
    }
}

/// The gateway itself. All calls are made for the authenticated identity
/// the gateway was built with; upserts are rejected with `Unauthorized`
/// when the caller cannot be proven to own the parent record.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create if absent, else update the mutable fields.
    async fn upsert_quiz(&self, quiz: &RemoteQuiz) -> Result<(), RemoteError>;
    /// Create if absent, else update the content. Rejected when the
    /// parent quiz does not belong to the caller.
    async fn upsert_chat_message(&self, message: &RemoteMessage) -> Result<(), RemoteError>;
    /// The complete current remote quiz set for the calling identity.
    async fn quizzes_by_user(&self) -> Result<Vec<RemoteQuiz>, RemoteError>;
    /// The complete current remote message set for the calling identity.
    async fn chat_messages_by_user(&self) -> Result<Vec<RemoteMessage>, RemoteError>;
    /// One quiz with embedded messages, or None when it does not exist.
    async fn quiz_by_id(&self, id: Uuid) -> Result<Option<RemoteQuizDetail>, RemoteError>;
    async fn delete_quiz(&self, id: Uuid) -> Result<(), RemoteError>;
    /// The identity snapshot backing the local user cache.
    async fn user_data(&self) -> Result<RemoteUserData, RemoteError>;
}
