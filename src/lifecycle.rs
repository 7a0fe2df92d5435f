//! Per-message lifecycle control.
//!
//! Owns the waiting → streaming → done | error state machine for model
//! messages and mirrors each transition onto the parent quiz, so the
//! session list can show "assistant is responding" without polling the
//! message table. Side effects are confined to the local store; uploading
//! a finalized message is the sync engine's job, triggered by whoever
//! observes the terminal state.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::db::{DatabaseError, LocalStore};
use crate::models::{MessageStatus, QuizStatus};

#[derive(Clone)]
pub struct MessageLifecycle {
    store: LocalStore,
}

impl MessageLifecycle {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Concatenate a streamed chunk onto the message, promoting
    /// waiting → streaming on the first one.
    ///
    /// A missing message (raced with a deletion) or a chunk arriving after
    /// a terminal state is logged and dropped rather than surfaced: the
    /// stream that produced it is already being torn down.
    pub fn append_chunk(&self, id: &Uuid, chunk: &str) -> Result<(), DatabaseError> {
        let Some(msg) = self.store.get_message(id)? else {
            warn!(message_id = %id, "dropping chunk for deleted message");
            return Ok(());
        };

        if !msg.status.can_transition_to(MessageStatus::Streaming)
            && msg.status != MessageStatus::Streaming
        {
            warn!(
                message_id = %id,
                status = msg.status.as_str(),
                "dropping chunk for message no longer streaming"
            );
            return Ok(());
        }

        self.store
            .append_message_content(&msg, chunk, MessageStatus::Streaming)?;
        self.mirror_to_quiz(&msg.quiz_id, MessageStatus::Streaming)?;
        Ok(())
    }

    /// Set a terminal status. `replacement` swaps the content wholesale
    /// (used for error text); otherwise the streamed content is kept.
    ///
    /// Invalid transitions (double finalize, finalize of a deleted
    /// message) are logged and ignored — terminal states absorb.
    pub fn finalize(
        &self,
        id: &Uuid,
        status: MessageStatus,
        replacement: Option<&str>,
    ) -> Result<(), DatabaseError> {
        debug_assert!(status.is_terminal());

        let Some(msg) = self.store.get_message(id)? else {
            warn!(message_id = %id, "finalize for deleted message");
            return Ok(());
        };

        if !msg.status.can_transition_to(status) {
            warn!(
                message_id = %id,
                from = msg.status.as_str(),
                to = status.as_str(),
                "ignoring invalid lifecycle transition"
            );
            return Ok(());
        }

        self.store.finalize_message(&msg, status, replacement)?;
        self.mirror_to_quiz(&msg.quiz_id, status)?;
        Ok(())
    }

    fn mirror_to_quiz(
        &self,
        quiz_id: &Uuid,
        status: MessageStatus,
    ) -> Result<(), DatabaseError> {
        let mirrored = QuizStatus::mirroring(status);
        let changed = self
            .store
            .update_quiz_status(quiz_id, mirrored, Utc::now())?;
        if !changed {
            warn!(quiz_id = %quiz_id, "parent quiz missing while mirroring status");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, Quiz};

    fn setup() -> (LocalStore, MessageLifecycle, Quiz, ChatMessage) {
        let store = LocalStore::in_memory().unwrap();
        let quiz = Quiz::new("lifecycle");
        store.put_quiz(&quiz).unwrap();
        let placeholder = ChatMessage::placeholder(quiz.id);
        store.put_message(&placeholder).unwrap();
        let lifecycle = MessageLifecycle::new(store.clone());
        (store, lifecycle, quiz, placeholder)
    }

    #[test]
    fn first_chunk_promotes_waiting_to_streaming() {
        let (store, lifecycle, quiz, msg) = setup();

        lifecycle.append_chunk(&msg.id, "Mitosis").unwrap();

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Streaming);
        assert_eq!(loaded.content, "Mitosis");

        let quiz = store.get_quiz(&quiz.id).unwrap().unwrap();
        assert_eq!(quiz.status, QuizStatus::Streaming);
    }

    #[test]
    fn chunks_concatenate_in_call_order() {
        let (store, lifecycle, _, msg) = setup();

        for chunk in ["Mitosis", " is", " cell division."] {
            lifecycle.append_chunk(&msg.id, chunk).unwrap();
        }

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.content, "Mitosis is cell division.");
    }

    #[test]
    fn finalize_done_keeps_content_and_mirrors_quiz() {
        let (store, lifecycle, quiz, msg) = setup();
        lifecycle.append_chunk(&msg.id, "answer").unwrap();

        lifecycle
            .finalize(&msg.id, MessageStatus::Done, None)
            .unwrap();

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Done);
        assert_eq!(loaded.content, "answer");

        let quiz = store.get_quiz(&quiz.id).unwrap().unwrap();
        assert_eq!(quiz.status, QuizStatus::Done);
    }

    #[test]
    fn finalize_error_replaces_content() {
        let (store, lifecycle, quiz, msg) = setup();
        lifecycle.append_chunk(&msg.id, "half an ans").unwrap();

        lifecycle
            .finalize(&msg.id, MessageStatus::Error, Some("cancelled"))
            .unwrap();

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Error);
        assert_eq!(loaded.content, "cancelled");
        assert_eq!(
            store.get_quiz(&quiz.id).unwrap().unwrap().status,
            QuizStatus::Error
        );
    }

    #[test]
    fn waiting_can_finalize_directly() {
        let (store, lifecycle, _, msg) = setup();

        lifecycle
            .finalize(&msg.id, MessageStatus::Error, Some("provider unreachable"))
            .unwrap();

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Error);
    }

    #[test]
    fn terminal_states_absorb_late_events() {
        let (store, lifecycle, _, msg) = setup();
        lifecycle.append_chunk(&msg.id, "final").unwrap();
        lifecycle
            .finalize(&msg.id, MessageStatus::Done, None)
            .unwrap();

        // A straggler chunk and a second finalize must both be no-ops.
        lifecycle.append_chunk(&msg.id, " extra").unwrap();
        lifecycle
            .finalize(&msg.id, MessageStatus::Error, Some("too late"))
            .unwrap();

        let loaded = store.get_message(&msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Done);
        assert_eq!(loaded.content, "final");
    }

    #[test]
    fn append_to_deleted_message_is_silent() {
        let (store, lifecycle, quiz, msg) = setup();
        store.delete_quiz(&quiz.id).unwrap();

        // Must not error: the stream lost a race with deletion.
        lifecycle.append_chunk(&msg.id, "orphan chunk").unwrap();
        lifecycle
            .finalize(&msg.id, MessageStatus::Done, None)
            .unwrap();
    }

    #[test]
    fn transitions_touch_quiz_timestamps() {
        let (store, lifecycle, quiz, msg) = setup();
        let before = store.get_quiz(&quiz.id).unwrap().unwrap();

        lifecycle.append_chunk(&msg.id, "tick").unwrap();

        let after = store.get_quiz(&quiz.id).unwrap().unwrap();
        assert!(after.updated_at >= before.updated_at);
        assert!(after.last_message_at >= before.last_message_at);
    }

    #[test]
    fn interleaved_quizzes_do_not_cross_contaminate() {
        let store = LocalStore::in_memory().unwrap();
        let lifecycle = MessageLifecycle::new(store.clone());

        let quiz_a = Quiz::new("a");
        let quiz_b = Quiz::new("b");
        store.put_quiz(&quiz_a).unwrap();
        store.put_quiz(&quiz_b).unwrap();
        let msg_a = ChatMessage::placeholder(quiz_a.id);
        let msg_b = ChatMessage::placeholder(quiz_b.id);
        store.put_message(&msg_a).unwrap();
        store.put_message(&msg_b).unwrap();

        // Interleave appends across two live streams.
        lifecycle.append_chunk(&msg_a.id, "A1").unwrap();
        lifecycle.append_chunk(&msg_b.id, "B1").unwrap();
        lifecycle.append_chunk(&msg_a.id, "A2").unwrap();
        lifecycle.append_chunk(&msg_b.id, "B2").unwrap();

        assert_eq!(
            store.get_message(&msg_a.id).unwrap().unwrap().content,
            "A1A2"
        );
        assert_eq!(
            store.get_message(&msg_b.id).unwrap().unwrap().content,
            "B1B2"
        );
    }
}
