//! HTTP implementation of the remote store gateway.
//!
//! Each trait method maps onto one RPC endpoint; the server performs
//! create-or-update on the `create`/`upsert` routes. The gateway attaches
//! the caller's session token so the server can attribute every request.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{
    RemoteError, RemoteMessage, RemoteQuiz, RemoteQuizDetail, RemoteStore, RemoteUserData,
};

pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    session_token: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, session_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token: session_token.into(),
        }
    }

    async fn post_rpc<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let url = format!("{}/rpc/{}", self.base_url, method);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.session_token)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(RemoteError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upsert_quiz(&self, quiz: &RemoteQuiz) -> Result<(), RemoteError> {
        let _: serde_json::Value = self.post_rpc("quiz.create", quiz).await?;
        Ok(())
    }

    async fn upsert_chat_message(&self, message: &RemoteMessage) -> Result<(), RemoteError> {
        let _: serde_json::Value = self.post_rpc("chatMessage.upsert", message).await?;
        Ok(())
    }

    async fn quizzes_by_user(&self) -> Result<Vec<RemoteQuiz>, RemoteError> {
        self.post_rpc("quiz.getByUser", &json!({})).await
    }

    async fn chat_messages_by_user(&self) -> Result<Vec<RemoteMessage>, RemoteError> {
        self.post_rpc("chatMessage.getUserChatMessages", &json!({}))
            .await
    }

    async fn quiz_by_id(&self, id: Uuid) -> Result<Option<RemoteQuizDetail>, RemoteError> {
        self.post_rpc("quiz.getById", &json!({ "id": id })).await
    }

    async fn delete_quiz(&self, id: Uuid) -> Result<(), RemoteError> {
        let _: serde_json::Value = self.post_rpc("quiz.delete", &json!({ "id": id })).await?;
        Ok(())
    }

    async fn user_data(&self) -> Result<RemoteUserData, RemoteError> {
        self.post_rpc("user.getUserData", &json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, Quiz};
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorded {
        bearer: Option<String>,
        quiz_upserts: Vec<serde_json::Value>,
    }

    async fn rpc_server() -> (String, Arc<Mutex<Recorded>>, tokio::task::JoinHandle<()>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        let app = Router::new()
            .route(
                "/rpc/quiz.create",
                post(
                    |State(rec): State<Arc<Mutex<Recorded>>>,
                     headers: HeaderMap,
                     Json(body): Json<serde_json::Value>| async move {
                        let mut rec = rec.lock().unwrap();
                        rec.bearer = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        rec.quiz_upserts.push(body);
                        Json(json!({"ok": true}))
                    },
                ),
            )
            .route(
                "/rpc/quiz.getByUser",
                post(|| async {
                    let quiz = RemoteQuiz::from_local(&Quiz::new("Remote quiz"));
                    Json(vec![quiz])
                }),
            )
            .route(
                "/rpc/chatMessage.upsert",
                post(|| async {
                    (axum::http::StatusCode::FORBIDDEN, "not your quiz")
                }),
            )
            .route(
                "/rpc/quiz.getById",
                post(|| async { Json(serde_json::Value::Null) }),
            )
            .route(
                "/rpc/user.getUserData",
                post(|| async {
                    Json(RemoteUserData {
                        id: "user-1".into(),
                        display_name: "Sam".into(),
                        email: Some("sam@example.com".into()),
                    })
                }),
            )
            .with_state(recorded.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), recorded, handle)
    }

    #[tokio::test]
    async fn upsert_quiz_posts_payload_with_bearer_token() {
        let (url, recorded, server) = rpc_server().await;
        let store = HttpRemoteStore::new(&url, "session-token");

        let quiz = RemoteQuiz::from_local(&Quiz::new("Uploaded"));
        store.upsert_quiz(&quiz).await.unwrap();

        let rec = recorded.lock().unwrap();
        assert_eq!(rec.bearer.as_deref(), Some("Bearer session-token"));
        assert_eq!(rec.quiz_upserts.len(), 1);
        assert_eq!(rec.quiz_upserts[0]["title"], "Uploaded");
        assert_eq!(rec.quiz_upserts[0]["id"], quiz.id.to_string());
        server.abort();
    }

    #[tokio::test]
    async fn quizzes_by_user_decodes_list() {
        let (url, _, server) = rpc_server().await;
        let store = HttpRemoteStore::new(&url, "t");

        let quizzes = store.quizzes_by_user().await.unwrap();
        assert_eq!(quizzes.len(), 1);
        assert_eq!(quizzes[0].title, "Remote quiz");
        server.abort();
    }

    #[tokio::test]
    async fn forbidden_maps_to_unauthorized() {
        let (url, _, server) = rpc_server().await;
        let store = HttpRemoteStore::new(&url, "t");

        let msg = RemoteMessage::from_local(&ChatMessage::user(Uuid::new_v4(), "hi"));
        let result = store.upsert_chat_message(&msg).await;
        assert!(matches!(result, Err(RemoteError::Unauthorized)));
        server.abort();
    }

    #[tokio::test]
    async fn null_body_is_a_missing_quiz() {
        let (url, _, server) = rpc_server().await;
        let store = HttpRemoteStore::new(&url, "t");

        let detail = store.quiz_by_id(Uuid::new_v4()).await.unwrap();
        assert!(detail.is_none());
        server.abort();
    }

    #[tokio::test]
    async fn user_data_decodes_snapshot() {
        let (url, _, server) = rpc_server().await;
        let store = HttpRemoteStore::new(&url, "t");

        let user = store.user_data().await.unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.email.as_deref(), Some("sam@example.com"));
        server.abort();
    }

    #[tokio::test]
    async fn unknown_route_is_a_status_error() {
        let (url, _, server) = rpc_server().await;
        let store = HttpRemoteStore::new(&url, "t");

        // quiz.delete is not mounted on the test server.
        let result = store.delete_quiz(Uuid::new_v4()).await;
        assert!(matches!(
            result,
            Err(RemoteError::Status { status: 404, .. })
        ));
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = HttpRemoteStore::new(&format!("http://{addr}"), "t");
        let result = store.quizzes_by_user().await;
        assert!(matches!(result, Err(RemoteError::Network(_))));
    }
}
