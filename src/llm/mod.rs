//! The generation boundary: a token-producing source with start, chunk,
//! completion and error events. The provider itself is a black box behind
//! [`GenerationClient`]; everything here is transport plumbing.

pub mod http;
pub mod mock;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use uuid::Uuid;

use crate::models::MessageRole;

/// One framed event on a generation channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One token chunk, to be appended in arrival order.
    Chunk(String),
    /// The provider finished the response.
    Done,
    /// The provider reported a failure; carries the raw provider message,
    /// which is never shown to the user verbatim.
    Failed(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed stream frame: {0}")]
    Protocol(String),
}

/// A prior turn sent along with the generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Everything the provider needs for one response: the conversation so
/// far and the newest user utterance.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub quiz_id: Uuid,
    pub history: Vec<GenerationTurn>,
    pub latest: String,
}

/// The events of one logical channel, in production order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GenerationError>> + Send>>;

/// A source of streamed responses. Exactly one logical channel is opened
/// per request; dropping the stream releases its transport resources.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn open_stream(&self, request: &GenerationRequest)
        -> Result<EventStream, GenerationError>;
}
