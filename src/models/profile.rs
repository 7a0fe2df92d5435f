use chrono::{DateTime, Utc};

/// Cached snapshot of the authenticated identity.
///
/// Replaced wholesale on each successful bulk sync-down; never mutated
/// field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    /// When this snapshot was taken from the server.
    pub synced_at: DateTime<Utc>,
}
