//! The service the frontend talks to.
//!
//! `submit` is the write path: optimistic local writes first, so the
//! conversation renders immediately, then a fire-and-forget upload and
//! the generation channel. Sign-in claims anonymous quizzes and runs the
//! bulk sync; sign-out cancels live channels and wipes local data.
//! Authentication itself stays outside — this type only holds the user id
//! the auth layer handed it.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::db::{DatabaseError, LocalStore, StoreChange};
use crate::lifecycle::MessageLifecycle;
use crate::llm::{GenerationClient, GenerationRequest, GenerationTurn};
use crate::models::{ChatMessage, MessageStatus, Ownership, Quiz, QuizStatus, UserProfile};
use crate::pipeline::StreamIngestor;
use crate::remote::RemoteStore;
use crate::sync::{SyncEngine, SyncError, SyncSummary};

/// Longest quiz title derived from the first message, in characters.
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("quiz {0} not found")]
    QuizNotFound(Uuid),
    #[error("message is empty")]
    EmptyMessage,
}

/// What `submit` created, plus a handle on the generation task.
pub struct SubmitOutcome {
    pub quiz_id: Uuid,
    pub user_message_id: Uuid,
    pub placeholder_id: Uuid,
    pub generation: JoinHandle<()>,
}

pub struct QuizService {
    store: LocalStore,
    sync: SyncEngine,
    ingestor: StreamIngestor,
    current_user: Mutex<Option<String>>,
}

impl QuizService {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        llm: Arc<dyn GenerationClient>,
    ) -> Self {
        let sync = SyncEngine::new(store.clone(), remote);
        let lifecycle = MessageLifecycle::new(store.clone());
        let ingestor = StreamIngestor::new(lifecycle, llm, sync.clone());
        Self {
            store,
            sync,
            ingestor,
            current_user: Mutex::new(None),
        }
    }

    fn user_id(&self) -> Option<String> {
        self.current_user.lock().ok().and_then(|u| u.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id().is_some()
    }

    // ── Reads for the frontend ──────────────────────────────

    pub fn quizzes(&self) -> Result<Vec<Quiz>, ServiceError> {
        Ok(self.store.quizzes()?)
    }

    pub fn messages(&self, quiz_id: &Uuid) -> Result<Vec<ChatMessage>, ServiceError> {
        Ok(self.store.messages_for_quiz(quiz_id)?)
    }

    pub fn profile(&self) -> Result<Option<UserProfile>, ServiceError> {
        Ok(self.store.profile()?)
    }

    /// The live-query feed: re-render whatever a change intersects.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }

    // ── Write path ──────────────────────────────────────────

    /// Record a user turn and start generating the reply.
    ///
    /// With no `quiz_id`, a new quiz is created, titled from the message.
    /// The user message and the model placeholder are written locally
    /// before anything touches the network; the streaming channel then
    /// mutates the placeholder in place.
    pub fn submit(
        &self,
        quiz_id: Option<Uuid>,
        text: &str,
    ) -> Result<SubmitOutcome, ServiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ServiceError::EmptyMessage);
        }

        let quiz = match quiz_id {
            Some(id) => self
                .store
                .get_quiz(&id)?
                .ok_or(ServiceError::QuizNotFound(id))?,
            None => {
                let mut quiz = Quiz::new(title_from_prompt(text));
                if let Some(user_id) = self.user_id() {
                    quiz.owner = Ownership::Owned(user_id);
                }
                self.store.put_quiz(&quiz)?;
                quiz
            }
        };

        // History is everything already in the quiz, before this turn.
        let history: Vec<GenerationTurn> = self
            .store
            .messages_for_quiz(&quiz.id)?
            .into_iter()
            .filter(|m| m.status == MessageStatus::Done)
            .map(|m| GenerationTurn {
                role: m.role,
                content: m.content,
            })
            .collect();

        let user_message = ChatMessage::user(quiz.id, text);
        self.store.put_message(&user_message)?;
        let placeholder = ChatMessage::placeholder(quiz.id);
        self.store.put_message(&placeholder)?;
        self.store
            .update_quiz_status(&quiz.id, QuizStatus::Waiting, Utc::now())?;

        let signed_in = self.is_signed_in();
        if signed_in {
            self.sync.spawn_upload_quiz(quiz.id);
            self.sync.spawn_upload_message(user_message.id);
        }

        let request = GenerationRequest {
            quiz_id: quiz.id,
            history,
            latest: text.to_string(),
        };
        let generation = self.ingestor.start(request, placeholder.id, signed_in);

        Ok(SubmitOutcome {
            quiz_id: quiz.id,
            user_message_id: user_message.id,
            placeholder_id: placeholder.id,
            generation,
        })
    }

    /// Stop the in-flight generation for a quiz, if any.
    pub fn cancel_generation(&self, quiz_id: &Uuid) -> bool {
        self.ingestor.registry().cancel(quiz_id)
    }

    /// Delete a quiz locally (cascading to its messages) and, when signed
    /// in, best-effort remotely.
    pub fn delete_quiz(&self, quiz_id: &Uuid) -> Result<bool, ServiceError> {
        self.ingestor.registry().cancel(quiz_id);
        let deleted = self.store.delete_quiz(quiz_id)?;
        if deleted && self.is_signed_in() {
            self.sync.spawn_delete_quiz(*quiz_id);
        }
        Ok(deleted)
    }

    // ── Identity lifecycle ──────────────────────────────────

    /// Adopt an authenticated identity: claim anonymous quizzes, then
    /// reconcile with the server. Returns the bulk sync counts.
    pub async fn sign_in(&self, user_id: &str) -> Result<SyncSummary, ServiceError> {
        if let Ok(mut current) = self.current_user.lock() {
            *current = Some(user_id.to_string());
        }
        let claimed = self.store.claim_anonymous_quizzes(user_id)?;
        if claimed > 0 {
            info!(user_id, claimed, "claimed anonymous quizzes on sign-in");
        }
        Ok(self.sync.bulk_sync().await?)
    }

    /// Drop the identity and wipe all local data. Live channels are
    /// cancelled first so nothing writes into the emptied store.
    pub fn sign_out(&self) -> Result<(), ServiceError> {
        self.ingestor.registry().cancel_all();
        if let Ok(mut current) = self.current_user.lock() {
            *current = None;
        }
        self.store.clear_all()?;
        Ok(())
    }

    /// Pull one session's complete remote state and merge it locally.
    pub async fn rehydrate_quiz(&self, quiz_id: &Uuid) -> Result<bool, ServiceError> {
        Ok(self.sync.rehydrate_quiz(*quiz_id).await?)
    }

    /// Re-upload records stranded `synced = false` by earlier failures.
    /// A no-op when signed out: anonymous records have no remote home yet.
    pub async fn reconcile(&self) -> Result<SyncSummary, ServiceError> {
        if !self.is_signed_in() {
            return Ok(SyncSummary::default());
        }
        Ok(self.sync.retry_unsynced().await?)
    }
}

/// Derive a quiz title from the first message. Truncates at
/// `TITLE_MAX_CHARS` with "..." if longer, handling UTF-8 correctly.
pub fn title_from_prompt(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return "New quiz".to_string();
    }

    let mut boundary = trimmed.len();
    for (count, (index, _)) in trimmed.char_indices().enumerate() {
        if count == TITLE_MAX_CHARS {
            boundary = index;
            break;
        }
    }

    if boundary >= trimmed.len() {
        trimmed.to_string()
    } else {
        format!("{}...", &trimmed[..boundary])
    }
}
