//! The local store: a shared SQLite connection plus a change feed.
//!
//! Every committed write publishes a [`StoreChange`] on a broadcast
//! channel, which is the live-query mechanism: any frontend (or test) can
//! subscribe and re-run its query when a change intersects it. The store
//! serialises conflicting operations on the same connection, so callers
//! need no external locking.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::repository::{message, profile, quiz};
use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{ChatMessage, MessageStatus, Quiz, QuizStatus, UserProfile};

/// Capacity of the change feed. Slow subscribers that fall further behind
/// than this observe a `Lagged` error and should re-query from scratch.
const CHANGE_FEED_CAPACITY: usize = 64;

/// What a committed write touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Quiz(Uuid),
    Message { quiz_id: Uuid, message_id: Uuid },
    Profile,
    Cleared,
}

/// Handle to the local database. Cheap to clone; all clones share one
/// connection and one change feed.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<StoreChange>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(open_memory_database()?))
    }

    fn from_connection(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        }
    }

    /// Subscribe to the change feed. Only changes committed after this
    /// call are observed.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    fn notify(&self, change: StoreChange) {
        // send() errors only when there are no subscribers; that is fine.
        let _ = self.changes.send(change);
    }

    // ── Quizzes ─────────────────────────────────────────────

    pub fn put_quiz(&self, quiz: &Quiz) -> Result<(), DatabaseError> {
        quiz::upsert_quiz(&*self.lock()?, quiz)?;
        self.notify(StoreChange::Quiz(quiz.id));
        Ok(())
    }

    /// Upsert-by-id merge of a whole batch inside one transaction. Rows
    /// absent from the batch are left untouched — never a truncate.
    pub fn bulk_put_quizzes(&self, quizzes: &[Quiz]) -> Result<(), DatabaseError> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            for q in quizzes {
                quiz::upsert_quiz(&tx, q)?;
            }
            tx.commit()?;
        }
        for q in quizzes {
            self.notify(StoreChange::Quiz(q.id));
        }
        Ok(())
    }

    pub fn get_quiz(&self, id: &Uuid) -> Result<Option<Quiz>, DatabaseError> {
        quiz::get_quiz(&*self.lock()?, id)
    }

    pub fn quizzes(&self) -> Result<Vec<Quiz>, DatabaseError> {
        quiz::list_quizzes(&*self.lock()?)
    }

    pub fn unsynced_quizzes(&self) -> Result<Vec<Quiz>, DatabaseError> {
        quiz::unsynced_quizzes(&*self.lock()?)
    }

    pub fn update_quiz_status(
        &self,
        id: &Uuid,
        status: QuizStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changed = quiz::update_quiz_status(&*self.lock()?, id, status, now)?;
        if changed {
            self.notify(StoreChange::Quiz(*id));
        }
        Ok(changed)
    }

    pub fn rename_quiz(&self, id: &Uuid, title: &str) -> Result<bool, DatabaseError> {
        let changed = quiz::update_quiz_title(&*self.lock()?, id, title, Utc::now())?;
        if changed {
            self.notify(StoreChange::Quiz(*id));
        }
        Ok(changed)
    }

    pub fn mark_quiz_synced(&self, id: &Uuid, synced: bool) -> Result<bool, DatabaseError> {
        let changed = quiz::mark_quiz_synced(&*self.lock()?, id, synced)?;
        if changed {
            self.notify(StoreChange::Quiz(*id));
        }
        Ok(changed)
    }

    pub fn claim_anonymous_quizzes(&self, owner_id: &str) -> Result<usize, DatabaseError> {
        let claimed = quiz::claim_anonymous_quizzes(&*self.lock()?, owner_id)?;
        if claimed > 0 {
            self.notify(StoreChange::Cleared);
        }
        Ok(claimed)
    }

    /// Delete a quiz and, via the schema's cascade, all its messages, as
    /// one atomic operation.
    pub fn delete_quiz(&self, id: &Uuid) -> Result<bool, DatabaseError> {
        let deleted = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let deleted = quiz::delete_quiz(&tx, id)?;
            tx.commit()?;
            deleted
        };
        if deleted {
            self.notify(StoreChange::Quiz(*id));
        }
        Ok(deleted)
    }

    // ── Messages ────────────────────────────────────────────

    pub fn put_message(&self, msg: &ChatMessage) -> Result<(), DatabaseError> {
        message::upsert_message(&*self.lock()?, msg)?;
        self.notify(StoreChange::Message {
            quiz_id: msg.quiz_id,
            message_id: msg.id,
        });
        Ok(())
    }

    /// Upsert-by-id merge of a whole batch inside one transaction.
    pub fn bulk_put_messages(&self, messages: &[ChatMessage]) -> Result<(), DatabaseError> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            for m in messages {
                message::upsert_message(&tx, m)?;
            }
            tx.commit()?;
        }
        for m in messages {
            self.notify(StoreChange::Message {
                quiz_id: m.quiz_id,
                message_id: m.id,
            });
        }
        Ok(())
    }

    pub fn get_message(&self, id: &Uuid) -> Result<Option<ChatMessage>, DatabaseError> {
        message::get_message(&*self.lock()?, id)
    }

    pub fn messages_for_quiz(&self, quiz_id: &Uuid) -> Result<Vec<ChatMessage>, DatabaseError> {
        message::messages_for_quiz(&*self.lock()?, quiz_id)
    }

    pub fn all_messages(&self) -> Result<Vec<ChatMessage>, DatabaseError> {
        message::all_messages(&*self.lock()?)
    }

    pub fn unsynced_messages(&self) -> Result<Vec<ChatMessage>, DatabaseError> {
        message::unsynced_messages(&*self.lock()?)
    }

    pub fn append_message_content(
        &self,
        msg: &ChatMessage,
        chunk: &str,
        status: MessageStatus,
    ) -> Result<bool, DatabaseError> {
        let changed = message::append_message_content(&*self.lock()?, &msg.id, chunk, status)?;
        if changed {
            self.notify(StoreChange::Message {
                quiz_id: msg.quiz_id,
                message_id: msg.id,
            });
        }
        Ok(changed)
    }

    pub fn finalize_message(
        &self,
        msg: &ChatMessage,
        status: MessageStatus,
        replacement: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let changed = message::finalize_message(&*self.lock()?, &msg.id, status, replacement)?;
        if changed {
            self.notify(StoreChange::Message {
                quiz_id: msg.quiz_id,
                message_id: msg.id,
            });
        }
        Ok(changed)
    }

    pub fn mark_message_synced(&self, id: &Uuid, synced: bool) -> Result<bool, DatabaseError> {
        let (changed, quiz_id) = {
            let conn = self.lock()?;
            let changed = message::mark_message_synced(&conn, id, synced)?;
            let quiz_id = if changed {
                message::get_message(&conn, id)?.map(|m| m.quiz_id)
            } else {
                None
            };
            (changed, quiz_id)
        };
        if let Some(quiz_id) = quiz_id {
            self.notify(StoreChange::Message {
                quiz_id,
                message_id: *id,
            });
        }
        Ok(changed)
    }

    // ── User cache ──────────────────────────────────────────

    pub fn replace_profile(&self, user: &UserProfile) -> Result<(), DatabaseError> {
        profile::replace_profile(&*self.lock()?, user)?;
        self.notify(StoreChange::Profile);
        Ok(())
    }

    pub fn profile(&self) -> Result<Option<UserProfile>, DatabaseError> {
        profile::get_profile(&*self.lock()?)
    }

    // ── Whole-store operations ──────────────────────────────

    /// Wipe all local data (logout). One transaction, so observers never
    /// see a half-cleared store.
    pub fn clear_all(&self) -> Result<(), DatabaseError> {
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chat_messages", [])?;
            tx.execute("DELETE FROM quizzes", [])?;
            tx.execute("DELETE FROM user_cache", [])?;
            tx.commit()?;
        }
        self.notify(StoreChange::Cleared);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;

    fn store() -> LocalStore {
        LocalStore::in_memory().unwrap()
    }

    #[test]
    fn put_and_read_back_through_clone() {
        let store = store();
        let handle = store.clone();

        let quiz = Quiz::new("shared");
        store.put_quiz(&quiz).unwrap();

        // Clones share the same underlying connection.
        assert_eq!(handle.get_quiz(&quiz.id).unwrap().unwrap().title, "shared");
    }

    #[test]
    fn writes_notify_subscribers_after_commit() {
        let store = store();
        let mut feed = store.subscribe();

        let quiz = Quiz::new("observed");
        store.put_quiz(&quiz).unwrap();
        assert_eq!(feed.try_recv().unwrap(), StoreChange::Quiz(quiz.id));

        let msg = ChatMessage::user(quiz.id, "hi");
        store.put_message(&msg).unwrap();
        assert_eq!(
            feed.try_recv().unwrap(),
            StoreChange::Message {
                quiz_id: quiz.id,
                message_id: msg.id,
            }
        );
    }

    #[test]
    fn reads_do_not_notify() {
        let store = store();
        let quiz = Quiz::new("quiet");
        store.put_quiz(&quiz).unwrap();

        let mut feed = store.subscribe();
        store.get_quiz(&quiz.id).unwrap();
        store.quizzes().unwrap();
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn failed_update_does_not_notify() {
        let store = store();
        let mut feed = store.subscribe();

        let ghost = Uuid::new_v4();
        let changed = store
            .update_quiz_status(&ghost, QuizStatus::Done, Utc::now())
            .unwrap();
        assert!(!changed);
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn delete_quiz_cascades_atomically() {
        let store = store();
        let quiz = Quiz::new("victim");
        store.put_quiz(&quiz).unwrap();
        store
            .put_message(&ChatMessage::user(quiz.id, "one"))
            .unwrap();
        store
            .put_message(&ChatMessage::placeholder(quiz.id))
            .unwrap();

        assert!(store.delete_quiz(&quiz.id).unwrap());
        assert!(store.get_quiz(&quiz.id).unwrap().is_none());
        assert!(store.messages_for_quiz(&quiz.id).unwrap().is_empty());
    }

    #[test]
    fn bulk_put_is_an_upsert_merge_not_a_replace() {
        let store = store();
        let local_only = Quiz::new("local only, unsynced");
        store.put_quiz(&local_only).unwrap();

        let mut incoming = Quiz::new("downloaded");
        incoming.synced = true;
        store.bulk_put_quizzes(&[incoming.clone()]).unwrap();

        // The local-only quiz survived the bulk write.
        let all = store.quizzes().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|q| q.id == local_only.id));
        assert!(all.iter().any(|q| q.id == incoming.id));
    }

    #[test]
    fn bulk_put_messages_updates_existing_rows() {
        let store = store();
        let quiz = Quiz::new("host");
        store.put_quiz(&quiz).unwrap();

        let mut msg = ChatMessage::user(quiz.id, "draft");
        store.put_message(&msg).unwrap();

        msg.content = "final".into();
        msg.synced = true;
        store.bulk_put_messages(std::slice::from_ref(&msg)).unwrap();

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.content, "final");
        assert!(loaded.synced);
        assert_eq!(loaded.role, MessageRole::User);
    }

    #[test]
    fn clear_all_empties_every_table() {
        let store = store();
        let quiz = Quiz::new("gone soon");
        store.put_quiz(&quiz).unwrap();
        store
            .put_message(&ChatMessage::user(quiz.id, "bye"))
            .unwrap();
        store
            .replace_profile(&UserProfile {
                id: "u".into(),
                display_name: "U".into(),
                email: None,
                synced_at: Utc::now(),
            })
            .unwrap();

        let mut feed = store.subscribe();
        store.clear_all().unwrap();

        assert!(store.quizzes().unwrap().is_empty());
        assert!(store.all_messages().unwrap().is_empty());
        assert!(store.profile().unwrap().is_none());
        assert_eq!(feed.try_recv().unwrap(), StoreChange::Cleared);
    }

    #[test]
    fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("askova.db");

        let quiz = Quiz::new("durable");
        {
            let store = LocalStore::open(&path).unwrap();
            store.put_quiz(&quiz).unwrap();
        }

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_quiz(&quiz.id).unwrap().unwrap().title,
            "durable"
        );
    }
}
