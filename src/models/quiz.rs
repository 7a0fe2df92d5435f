use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::enums::QuizStatus;

/// Who a quiz belongs to.
///
/// Quizzes created before the user authenticates have no owner; the owner
/// is attached exactly once when the session is claimed on login. Modelled
/// as a sum type rather than a bare `Option` so the claim transition is an
/// explicit, exhaustively handled state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    Anonymous,
    Owned(String),
}

impl Ownership {
    pub fn from_column(owner_id: Option<String>) -> Self {
        match owner_id {
            Some(id) => Self::Owned(id),
            None => Self::Anonymous,
        }
    }

    pub fn as_column(&self) -> Option<&str> {
        match self {
            Self::Owned(id) => Some(id),
            Self::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// A study session: one conversation thread between the user and the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Quiz {
    /// Client-generated, immutable once created.
    pub id: Uuid,
    pub title: String,
    pub owner: Ownership,
    pub created_at: DateTime<Utc>,
    /// Monotonically non-decreasing; bumped whenever a child message changes.
    pub updated_at: DateTime<Utc>,
    /// Monotonically non-decreasing; bumped whenever a child message changes.
    pub last_message_at: DateTime<Utc>,
    /// Whether a generation is currently in flight for this session.
    pub status: QuizStatus,
    /// True once the record exists remotely with matching identity.
    pub synced: bool,
}

impl Quiz {
    /// A fresh local-only quiz. Anonymous until claimed on login.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            owner: Ownership::Anonymous,
            created_at: now,
            updated_at: now,
            last_message_at: now,
            status: QuizStatus::Idle,
            synced: false,
        }
    }

    /// Bump the activity timestamps without ever moving them backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
        self.last_message_at = self.last_message_at.max(now);
    }
}
