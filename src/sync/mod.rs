//! Reconciliation between the local store and the remote store.
//!
//! Two entry points: incremental single-record uploads after local
//! mutations, and the five-phase bulk sync run once per authenticated
//! session. A message is never uploaded before its parent quiz exists
//! remotely — the server rejects upserts whose parent it cannot attribute
//! to the caller — so the bulk phases settle quizzes fully before
//! computing message eligibility.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{DatabaseError, LocalStore};
use crate::models::{ChatMessage, Quiz};
use crate::remote::{RemoteError, RemoteMessage, RemoteQuiz, RemoteStore};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Outcome counts of a bulk sync run (or a reconciliation sweep, which
/// fills only the upload fields).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub uploaded_quizzes: usize,
    pub failed_quiz_uploads: usize,
    pub uploaded_messages: usize,
    pub failed_message_uploads: usize,
    /// Messages whose parent quiz upload failed this run; not retried
    /// within the run.
    pub skipped_messages: usize,
    pub downloaded_quizzes: usize,
    pub downloaded_messages: usize,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self { store, remote }
    }

    // ── Incremental sync ────────────────────────────────────

    /// Upload one quiz and mark it synced. Best-effort: the caller decides
    /// whether a failure is fatal; fire-and-forget callers just log it.
    pub async fn upload_quiz(&self, id: Uuid) -> Result<(), SyncError> {
        let Some(quiz) = self.store.get_quiz(&id)? else {
            warn!(quiz_id = %id, "quiz vanished before upload");
            return Ok(());
        };
        self.remote.upsert_quiz(&RemoteQuiz::from_local(&quiz)).await?;
        self.store.mark_quiz_synced(&id, true)?;
        Ok(())
    }

    /// Upload one message, uploading its parent quiz first when that has
    /// not reached the server yet.
    pub async fn upload_message(&self, id: Uuid) -> Result<(), SyncError> {
        let Some(message) = self.store.get_message(&id)? else {
            warn!(message_id = %id, "message vanished before upload");
            return Ok(());
        };
        let parent_synced = self
            .store
            .get_quiz(&message.quiz_id)?
            .map(|q| q.synced)
            .unwrap_or(false);
        if !parent_synced {
            self.upload_quiz(message.quiz_id).await?;
        }
        self.remote
            .upsert_chat_message(&RemoteMessage::from_local(&message))
            .await?;
        self.store.mark_message_synced(&id, true)?;
        Ok(())
    }

    /// Detached upload whose failure lands in the log, not on the caller.
    /// The record keeps `synced = false` for a later sweep or bulk run.
    pub fn spawn_upload_quiz(&self, id: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.upload_quiz(id).await {
                warn!(quiz_id = %id, error = %e, "background quiz upload failed");
            }
        });
    }

    pub fn spawn_upload_message(&self, id: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.upload_message(id).await {
                warn!(message_id = %id, error = %e, "background message upload failed");
            }
        });
    }

    /// Detached remote delete after a local delete. Failure leaves the
    /// remote copy behind; the next bulk sync will resurrect it locally,
    /// which is the safe direction.
    pub fn spawn_delete_quiz(&self, id: Uuid) {
        let remote = self.remote.clone();
        tokio::spawn(async move {
            if let Err(e) = remote.delete_quiz(id).await {
                warn!(quiz_id = %id, error = %e, "background quiz delete failed");
            }
        });
    }

    // ── Bulk sync ───────────────────────────────────────────

    /// Five phases: fetch remote state, read local state, upload
    /// local-only quizzes, upload eligible local-only messages, then
    /// merge the downloaded sets into the local store.
    ///
    /// Uploads within a phase run concurrently and settle independently:
    /// one record's failure never aborts the batch. The download merge in
    /// phase 5 runs unconditionally, and is an upsert by id — local-only
    /// records that failed to upload stay visible with `synced = false`.
    pub async fn bulk_sync(&self) -> Result<SyncSummary, SyncError> {
        let mut summary = SyncSummary::default();

        // Phase 1: complete remote state, fetched concurrently.
        let (remote_quizzes, remote_messages, remote_user) = tokio::join!(
            self.remote.quizzes_by_user(),
            self.remote.chat_messages_by_user(),
            self.remote.user_data(),
        );
        let remote_quizzes = remote_quizzes?;
        let remote_messages = remote_messages?;

        // Phase 2: complete local state.
        let local_quizzes = self.store.quizzes()?;
        let local_messages = self.store.all_messages()?;

        // Phase 3: upload quizzes the server has never seen.
        let remote_quiz_ids: HashSet<Uuid> = remote_quizzes.iter().map(|q| q.id).collect();
        let quizzes_to_upload: Vec<&Quiz> = local_quizzes
            .iter()
            .filter(|q| !remote_quiz_ids.contains(&q.id))
            .collect();

        let quiz_results = join_all(quizzes_to_upload.iter().map(|quiz| async move {
            let result = self
                .remote
                .upsert_quiz(&RemoteQuiz::from_local(quiz))
                .await;
            (quiz.id, result)
        }))
        .await;

        let mut settled_quiz_ids: HashSet<Uuid> = HashSet::new();
        for (id, result) in quiz_results {
            match result {
                Ok(()) => {
                    self.store.mark_quiz_synced(&id, true)?;
                    settled_quiz_ids.insert(id);
                    summary.uploaded_quizzes += 1;
                }
                Err(e) => {
                    warn!(quiz_id = %id, error = %e, "quiz upload failed during bulk sync");
                    summary.failed_quiz_uploads += 1;
                }
            }
        }

        // Phase 4: upload messages whose parent is now known remotely.
        // Quizzes settled fully above, so eligibility is exact.
        let remote_message_ids: HashSet<Uuid> = remote_messages.iter().map(|m| m.id).collect();
        let mut messages_to_upload: Vec<&ChatMessage> = Vec::new();
        for message in local_messages
            .iter()
            .filter(|m| !remote_message_ids.contains(&m.id))
        {
            if remote_quiz_ids.contains(&message.quiz_id)
                || settled_quiz_ids.contains(&message.quiz_id)
            {
                messages_to_upload.push(message);
            } else {
                summary.skipped_messages += 1;
            }
        }

        let message_results = join_all(messages_to_upload.iter().map(|message| async move {
            let result = self
                .remote
                .upsert_chat_message(&RemoteMessage::from_local(message))
                .await;
            (message.id, result)
        }))
        .await;

        for (id, result) in message_results {
            match result {
                Ok(()) => {
                    self.store.mark_message_synced(&id, true)?;
                    summary.uploaded_messages += 1;
                }
                Err(e) => {
                    warn!(message_id = %id, error = %e, "message upload failed during bulk sync");
                    summary.failed_message_uploads += 1;
                }
            }
        }

        // Phase 5: merge the server's view into the local store,
        // unconditionally. Upsert by id, never a truncate, so unsynced
        // local-only records survive.
        summary.downloaded_quizzes = remote_quizzes.len();
        summary.downloaded_messages = remote_messages.len();

        let downloaded_quizzes: Vec<Quiz> = remote_quizzes
            .into_iter()
            .map(RemoteQuiz::into_local)
            .collect();
        let downloaded_messages: Vec<ChatMessage> = remote_messages
            .into_iter()
            .map(RemoteMessage::into_local)
            .collect();
        self.store.bulk_put_quizzes(&downloaded_quizzes)?;
        self.store.bulk_put_messages(&downloaded_messages)?;

        match remote_user {
            Ok(user) => {
                self.store
                    .replace_profile(&user.into_profile(chrono::Utc::now()))?;
            }
            Err(e) => {
                warn!(error = %e, "user snapshot fetch failed; keeping stale cache");
            }
        }

        info!(
            uploaded_quizzes = summary.uploaded_quizzes,
            failed_quiz_uploads = summary.failed_quiz_uploads,
            uploaded_messages = summary.uploaded_messages,
            failed_message_uploads = summary.failed_message_uploads,
            skipped_messages = summary.skipped_messages,
            downloaded_quizzes = summary.downloaded_quizzes,
            downloaded_messages = summary.downloaded_messages,
            "bulk sync finished"
        );
        Ok(summary)
    }

    /// Pull one quiz with its embedded messages and merge it into the
    /// local store (full rehydration of a session, e.g. opening a quiz
    /// that only a summary row exists for). Returns false when the server
    /// does not know the quiz.
    pub async fn rehydrate_quiz(&self, id: Uuid) -> Result<bool, SyncError> {
        let Some(detail) = self.remote.quiz_by_id(id).await? else {
            return Ok(false);
        };
        self.store.bulk_put_quizzes(&[detail.quiz.into_local()])?;
        let messages: Vec<ChatMessage> = detail
            .messages
            .into_iter()
            .map(RemoteMessage::into_local)
            .collect();
        self.store.bulk_put_messages(&messages)?;
        Ok(true)
    }

    // ── Reconciliation sweep ────────────────────────────────

    /// Re-scan for records left `synced = false` by earlier failures and
    /// retry their uploads, quizzes before dependent messages. Intended
    /// for a periodic supervisor or a connectivity-regained hook.
    pub async fn retry_unsynced(&self) -> Result<SyncSummary, SyncError> {
        let mut summary = SyncSummary::default();

        let quizzes = self.store.unsynced_quizzes()?;
        let quiz_results = join_all(quizzes.iter().map(|quiz| async move {
            let result = self
                .remote
                .upsert_quiz(&RemoteQuiz::from_local(quiz))
                .await;
            (quiz.id, result)
        }))
        .await;

        let mut settled: HashSet<Uuid> = HashSet::new();
        for (id, result) in quiz_results {
            match result {
                Ok(()) => {
                    self.store.mark_quiz_synced(&id, true)?;
                    settled.insert(id);
                    summary.uploaded_quizzes += 1;
                }
                Err(e) => {
                    warn!(quiz_id = %id, error = %e, "quiz retry failed");
                    summary.failed_quiz_uploads += 1;
                }
            }
        }

        let messages = self.store.unsynced_messages()?;
        let mut eligible: Vec<&ChatMessage> = Vec::new();
        for message in &messages {
            let parent_ok = settled.contains(&message.quiz_id)
                || self
                    .store
                    .get_quiz(&message.quiz_id)?
                    .map(|q| q.synced)
                    .unwrap_or(false);
            if parent_ok {
                eligible.push(message);
            } else {
                summary.skipped_messages += 1;
            }
        }

        let message_results = join_all(eligible.iter().map(|message| async move {
            let result = self
                .remote
                .upsert_chat_message(&RemoteMessage::from_local(message))
                .await;
            (message.id, result)
        }))
        .await;

        for (id, result) in message_results {
            match result {
                Ok(()) => {
                    self.store.mark_message_synced(&id, true)?;
                    summary.uploaded_messages += 1;
                }
                Err(e) => {
                    warn!(message_id = %id, error = %e, "message retry failed");
                    summary.failed_message_uploads += 1;
                }
            }
        }

        Ok(summary)
    }
}
