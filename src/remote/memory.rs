//! In-memory remote store double for tests.
//!
//! Mimics the server's two load-bearing behaviours: upserts are
//! idempotent by id, and a message upsert is rejected when the parent
//! quiz is not present (the server cannot prove ownership of the parent).
//! Individual records can be scripted to fail, and every call is recorded
//! for ordering assertions.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    RemoteError, RemoteMessage, RemoteQuiz, RemoteQuizDetail, RemoteStore, RemoteUserData,
};

#[derive(Default)]
struct Inner {
    quizzes: HashMap<Uuid, RemoteQuiz>,
    messages: HashMap<Uuid, RemoteMessage>,
    fail_quiz_upserts: HashSet<Uuid>,
    fail_message_upserts: HashSet<Uuid>,
    ops: Vec<String>,
}

pub struct InMemoryRemoteStore {
    user: RemoteUserData,
    inner: Mutex<Inner>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::with_user(RemoteUserData {
            id: "user-1".to_string(),
            display_name: "Test User".to_string(),
            email: None,
        })
    }

    pub fn with_user(user: RemoteUserData) -> Self {
        Self {
            user,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("remote double lock")
    }

    /// Pre-populate a quiz, as if uploaded in an earlier session.
    pub fn seed_quiz(&self, quiz: RemoteQuiz) {
        self.lock().quizzes.insert(quiz.id, quiz);
    }

    pub fn seed_message(&self, message: RemoteMessage) {
        self.lock().messages.insert(message.id, message);
    }

    /// Make the next upserts of this quiz fail with a network error.
    pub fn fail_quiz_upsert(&self, id: Uuid) {
        self.lock().fail_quiz_upserts.insert(id);
    }

    pub fn fail_message_upsert(&self, id: Uuid) {
        self.lock().fail_message_upserts.insert(id);
    }

    /// Every gateway call so far, in invocation order.
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn has_quiz(&self, id: &Uuid) -> bool {
        self.lock().quizzes.contains_key(id)
    }

    pub fn has_message(&self, id: &Uuid) -> bool {
        self.lock().messages.contains_key(id)
    }

    pub fn quiz_count(&self) -> usize {
        self.lock().quizzes.len()
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert_quiz(&self, quiz: &RemoteQuiz) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.ops.push(format!("quiz.upsert {}", quiz.id));
        if inner.fail_quiz_upserts.contains(&quiz.id) {
            return Err(RemoteError::Network("injected quiz upsert failure".into()));
        }
        inner.quizzes.insert(quiz.id, quiz.clone());
        Ok(())
    }

    async fn upsert_chat_message(&self, message: &RemoteMessage) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.ops.push(format!("message.upsert {}", message.id));
        if inner.fail_message_upserts.contains(&message.id) {
            return Err(RemoteError::Network(
                "injected message upsert failure".into(),
            ));
        }
        // Referential/ownership integrity: the parent must already exist.
        if !inner.quizzes.contains_key(&message.quiz_id) {
            return Err(RemoteError::Unauthorized);
        }
        inner.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn quizzes_by_user(&self) -> Result<Vec<RemoteQuiz>, RemoteError> {
        let mut inner = self.lock();
        inner.ops.push("quiz.getByUser".into());
        Ok(inner.quizzes.values().cloned().collect())
    }

    async fn chat_messages_by_user(&self) -> Result<Vec<RemoteMessage>, RemoteError> {
        let mut inner = self.lock();
        inner.ops.push("chatMessage.getUserChatMessages".into());
        Ok(inner.messages.values().cloned().collect())
    }

    async fn quiz_by_id(&self, id: Uuid) -> Result<Option<RemoteQuizDetail>, RemoteError> {
        let mut inner = self.lock();
        inner.ops.push(format!("quiz.getById {id}"));
        let Some(quiz) = inner.quizzes.get(&id).cloned() else {
            return Ok(None);
        };
        let mut messages: Vec<RemoteMessage> = inner
            .messages
            .values()
            .filter(|m| m.quiz_id == id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        Ok(Some(RemoteQuizDetail { quiz, messages }))
    }

    async fn delete_quiz(&self, id: Uuid) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.ops.push(format!("quiz.delete {id}"));
        inner.quizzes.remove(&id);
        inner.messages.retain(|_, m| m.quiz_id != id);
        Ok(())
    }

    async fn user_data(&self) -> Result<RemoteUserData, RemoteError> {
        let mut inner = self.lock();
        inner.ops.push("user.getUserData".into());
        Ok(self.user.clone())
    }
}
