//! Streaming generation client over HTTP.
//!
//! Opens one request per channel against the provider's SSE fallback
//! endpoint and turns the byte stream into [`StreamEvent`]s through the
//! frame buffer. The stream ends after the first terminal event; a body
//! that closes without one is surfaced as end-of-stream and handled by the
//! ingestion pipeline.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use super::sse::{decode_frame, SseFrameBuffer};
use super::{EventStream, GenerationClient, GenerationError, GenerationRequest, StreamEvent};
use crate::config::Config;

const STREAM_RPC: &str = "rpc/llm.generateResponseStream";
/// Header carrying the provider API key.
const API_KEY_HEADER: &str = "x-api-key";

pub struct HttpGenerationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequestBody<'a> {
    quiz_id: Uuid,
    latest_user_message_content: &'a str,
    history: &'a [super::GenerationTurn],
}

impl HttpGenerationClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.llm_base_url, &config.api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<EventStream, GenerationError> {
        let url = format!("{}/{}", self.base_url, STREAM_RPC);
        let body = StreamRequestBody {
            quiz_id: request.quiz_id,
            latest_user_message_content: &request.latest,
            history: &request.history,
        };

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    GenerationError::Network(e.to_string())
                } else {
                    GenerationError::Network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = Box::pin(response.bytes_stream());
        let events = stream::try_unfold(
            (bytes, SseFrameBuffer::new(), false),
            |(mut bytes, mut buf, finished)| async move {
                if finished {
                    return Ok(None);
                }
                loop {
                    while let Some(frame) = buf.next_frame() {
                        if let Some(event) = decode_frame(&frame)? {
                            let terminal = matches!(
                                event,
                                StreamEvent::Done | StreamEvent::Failed(_)
                            );
                            return Ok(Some((event, (bytes, buf, terminal))));
                        }
                    }
                    match bytes.next().await {
                        Some(Ok(read)) => buf.extend(&read),
                        Some(Err(e)) => {
                            return Err(GenerationError::Network(e.to_string()));
                        }
                        // Body closed without a terminal frame: end the
                        // stream and let the consumer decide.
                        None => return Ok(None),
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }
}
