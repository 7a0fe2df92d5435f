//! Scripted generation client for testing — plays back a fixed sequence
//! of channel events, optionally stalling forever to exercise
//! cancellation.

use async_trait::async_trait;
use futures_util::stream;

use super::{EventStream, GenerationClient, GenerationError, GenerationRequest, StreamEvent};

/// One step of a scripted channel.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Emit(Result<StreamEvent, GenerationError>),
    /// Park the stream forever; only cancellation or dropping ends it.
    Stall,
}

/// Plays the same script on every opened channel.
pub struct ScriptedGenerationClient {
    script: Vec<ScriptStep>,
}

impl ScriptedGenerationClient {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self { script }
    }

    /// A well-behaved response: the given chunks, then completion.
    pub fn completing(chunks: &[&str]) -> Self {
        let mut script: Vec<ScriptStep> = chunks
            .iter()
            .map(|c| ScriptStep::Emit(Ok(StreamEvent::Chunk(c.to_string()))))
            .collect();
        script.push(ScriptStep::Emit(Ok(StreamEvent::Done)));
        Self::new(script)
    }

    /// A response that fails with a provider error after the given chunks.
    pub fn failing(chunks: &[&str], error: &str) -> Self {
        let mut script: Vec<ScriptStep> = chunks
            .iter()
            .map(|c| ScriptStep::Emit(Ok(StreamEvent::Chunk(c.to_string()))))
            .collect();
        script.push(ScriptStep::Emit(Ok(StreamEvent::Failed(error.to_string()))));
        Self::new(script)
    }

    /// A response that emits the given chunks and then hangs.
    pub fn stalling(chunks: &[&str]) -> Self {
        let mut script: Vec<ScriptStep> = chunks
            .iter()
            .map(|c| ScriptStep::Emit(Ok(StreamEvent::Chunk(c.to_string()))))
            .collect();
        script.push(ScriptStep::Stall);
        Self::new(script)
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerationClient {
    async fn open_stream(
        &self,
        _request: &GenerationRequest,
    ) -> Result<EventStream, GenerationError> {
        let script = self.script.clone();
        let events = stream::unfold((script, 0usize), |(script, i)| async move {
            match script.get(i).cloned() {
                Some(ScriptStep::Emit(event)) => Some((event, (script, i + 1))),
                Some(ScriptStep::Stall) => {
                    futures_util::future::pending::<()>().await;
                    None
                }
                None => None,
            }
        });
        Ok(Box::pin(events))
    }
}
