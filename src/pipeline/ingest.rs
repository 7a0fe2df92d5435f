//! Streaming ingestion: one generation request in, a sequence of
//! lifecycle calls out.
//!
//! At most one channel is live per quiz; starting a new one cancels the
//! old one first. Every exit path — completion, provider error, transport
//! error, cancellation — finalizes the placeholder message and drops the
//! stream, so no message is left waiting and no channel is leaked.
//! Channels of other quizzes are never affected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::lifecycle::MessageLifecycle;
use crate::llm::{GenerationClient, GenerationRequest, StreamEvent};
use crate::models::MessageStatus;
use crate::sync::SyncEngine;

/// Content recorded on a message whose channel was cancelled.
pub const CANCELLED_CONTENT: &str = "cancelled";

/// The closed set of user-facing failure explanations. Raw provider text
/// is mapped into one of these and never shown verbatim.
pub const SAFETY_MESSAGE: &str =
    "That request was declined by the content safety filter. Try rephrasing your question.";
pub const NETWORK_MESSAGE: &str =
    "Couldn't reach the assistant. Check your connection and try again.";
pub const GENERIC_MESSAGE: &str = "Something went wrong while generating a response.";

/// Map a raw provider/transport error onto the closed user-facing set.
pub fn user_facing_error(raw: &str) -> &'static str {
    let lower = raw.to_lowercase();
    if lower.contains("safety")
        || lower.contains("content_filter")
        || lower.contains("content filter")
        || lower.contains("blocked")
    {
        SAFETY_MESSAGE
    } else if lower.contains("connect")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("network")
        || lower.contains("unreachable")
    {
        NETWORK_MESSAGE
    } else {
        GENERIC_MESSAGE
    }
}

// ── Channel registry ────────────────────────────────────────

struct ActiveChannel {
    channel_id: u64,
    token: CancellationToken,
}

/// Tracks the live channel per quiz. Channel ids increase monotonically
/// so a finished task only removes its own registration, never a newer
/// channel that took its slot.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<Mutex<HashMap<Uuid, ActiveChannel>>>,
    next_id: Arc<AtomicU64>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new channel for the quiz, cancelling any prior one.
    pub fn begin(&self, quiz_id: Uuid) -> (u64, CancellationToken) {
        let channel_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Ok(mut channels) = self.channels.lock() {
            if let Some(previous) = channels.insert(
                quiz_id,
                ActiveChannel {
                    channel_id,
                    token: token.clone(),
                },
            ) {
                previous.token.cancel();
            }
        }
        (channel_id, token)
    }

    /// Remove a finished channel, but only if it still owns the slot.
    pub fn finish(&self, quiz_id: Uuid, channel_id: u64) {
        if let Ok(mut channels) = self.channels.lock() {
            if channels
                .get(&quiz_id)
                .is_some_and(|c| c.channel_id == channel_id)
            {
                channels.remove(&quiz_id);
            }
        }
    }

    /// Cancel the live channel for one quiz, if any.
    pub fn cancel(&self, quiz_id: &Uuid) -> bool {
        if let Ok(channels) = self.channels.lock() {
            if let Some(channel) = channels.get(quiz_id) {
                channel.token.cancel();
                return true;
            }
        }
        false
    }

    /// Cancel every live channel (logout, shutdown).
    pub fn cancel_all(&self) {
        if let Ok(channels) = self.channels.lock() {
            for channel in channels.values() {
                channel.token.cancel();
            }
        }
    }

    pub fn is_active(&self, quiz_id: &Uuid) -> bool {
        self.channels
            .lock()
            .map(|channels| channels.contains_key(quiz_id))
            .unwrap_or(false)
    }
}

// ── Ingestor ────────────────────────────────────────────────

#[derive(Clone)]
pub struct StreamIngestor {
    lifecycle: MessageLifecycle,
    llm: Arc<dyn GenerationClient>,
    sync: SyncEngine,
    registry: ChannelRegistry,
}

impl StreamIngestor {
    pub fn new(
        lifecycle: MessageLifecycle,
        llm: Arc<dyn GenerationClient>,
        sync: SyncEngine,
    ) -> Self {
        Self {
            lifecycle,
            llm,
            sync,
            registry: ChannelRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Open a channel for the request and feed its events into the
    /// placeholder message. Any channel already live for the quiz is
    /// cancelled first. When `upload_when_done` is set, a completed
    /// message is uploaded fire-and-forget once it reaches its terminal
    /// state.
    pub fn start(
        &self,
        request: GenerationRequest,
        placeholder_id: Uuid,
        upload_when_done: bool,
    ) -> JoinHandle<()> {
        let quiz_id = request.quiz_id;
        let (channel_id, token) = self.registry.begin(quiz_id);
        let ingestor = self.clone();

        tokio::spawn(async move {
            ingestor
                .run_channel(request, placeholder_id, upload_when_done, &token)
                .await;
            ingestor.registry.finish(quiz_id, channel_id);
        })
    }

    async fn run_channel(
        &self,
        request: GenerationRequest,
        placeholder_id: Uuid,
        upload_when_done: bool,
        token: &CancellationToken,
    ) {
        // Opening the channel is itself a suspension point; respect
        // cancellation that lands before the first byte.
        let open = tokio::select! {
            _ = token.cancelled() => {
                self.finalize_cancelled(&placeholder_id);
                return;
            }
            open = self.llm.open_stream(&request) => open,
        };

        let mut stream = match open {
            Ok(stream) => stream,
            Err(e) => {
                warn!(quiz_id = %request.quiz_id, error = %e, "failed to open generation channel");
                self.finalize_error(&placeholder_id, user_facing_error(&e.to_string()));
                return;
            }
        };

        let mut completed = false;
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.finalize_cancelled(&placeholder_id);
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(StreamEvent::Chunk(text))) => {
                        if let Err(e) = self.lifecycle.append_chunk(&placeholder_id, &text) {
                            error!(message_id = %placeholder_id, error = %e, "chunk append failed");
                        }
                    }
                    Some(Ok(StreamEvent::Done)) => {
                        if let Err(e) =
                            self.lifecycle.finalize(&placeholder_id, MessageStatus::Done, None)
                        {
                            error!(message_id = %placeholder_id, error = %e, "finalize failed");
                        }
                        completed = true;
                        break;
                    }
                    Some(Ok(StreamEvent::Failed(raw))) => {
                        info!(quiz_id = %request.quiz_id, provider_error = %raw, "generation failed");
                        self.finalize_error(&placeholder_id, user_facing_error(&raw));
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(quiz_id = %request.quiz_id, error = %e, "generation channel broke");
                        self.finalize_error(&placeholder_id, user_facing_error(&e.to_string()));
                        break;
                    }
                    // The channel closed without a terminal event.
                    None => {
                        warn!(quiz_id = %request.quiz_id, "generation channel ended without completion");
                        self.finalize_error(&placeholder_id, GENERIC_MESSAGE);
                        break;
                    }
                }
            }
        }

        // Releases the transport on every exit path.
        drop(stream);

        if completed && upload_when_done {
            self.sync.spawn_upload_message(placeholder_id);
        }
    }

    fn finalize_error(&self, placeholder_id: &Uuid, message: &str) {
        if let Err(e) = self
            .lifecycle
            .finalize(placeholder_id, MessageStatus::Error, Some(message))
        {
            error!(message_id = %placeholder_id, error = %e, "error finalize failed");
        }
    }

    /// Cancellation is a distinguished outcome: the message still reaches
    /// a terminal state so the conversation never waits forever, but the
    /// content marks it as cancelled rather than failed.
    fn finalize_cancelled(&self, placeholder_id: &Uuid) {
        self.finalize_error(placeholder_id, CANCELLED_CONTENT);
    }
}
