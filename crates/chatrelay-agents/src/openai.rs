use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use futures::StreamExt;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::providers::{EventStream, LlmProvider, LlmRequest, StreamEvent, Usage};

const DEFAULT_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// OpenAI Chat Completions provider.
/// Also works with OpenAI-compatible APIs (Azure, local models) via `base_url`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    fn build_request(&self, request: &LlmRequest) -> OpenAiRequest {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        let mut messages: Vec<OpenAiMessage> = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }

        messages.extend(request.messages.iter().map(|msg| OpenAiMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }));

        OpenAiRequest {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn configured_model(&self) -> Option<&str> {
        Some(&self.model)
    }

    #[instrument(skip(self, request), fields(model))]
    async fn stream_complete(&self, request: &LlmRequest) -> Result<EventStream> {
        let body = self.build_request(request);

        tracing::Span::current().record("model", body.model.as_str());
        debug!(
            "openai stream request: model={}, messages={}",
            body.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("openai stream request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "openai API error: status={status}, body={body}"
            )));
        }

        let byte_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(sse_events(byte_stream))
    }
}

/// Turn a raw SSE byte stream into completion events.
///
/// Bytes are buffered until a whole frame has arrived, so multi-byte
/// characters split across network reads decode intact.
fn sse_events(byte_stream: ByteStream) -> EventStream {
    let event_stream = futures::stream::unfold(
        (byte_stream, Vec::<u8>::new(), VecDeque::new(), false),
        |(mut stream, mut buffer, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (stream, buffer, pending, done)));
                }
                if done {
                    return None;
                }

                // Try to consume a complete SSE event from the buffer
                if let Some(pos) = find_frame_end(&buffer) {
                    let frame: Vec<u8> = buffer.drain(..pos + 2).collect();
                    let event_str = match std::str::from_utf8(&frame[..pos]) {
                        Ok(text) => text,
                        Err(e) => {
                            done = true;
                            return Some((
                                Err(Error::Agent(format!("stream frame is not valid UTF-8: {e}"))),
                                (stream, buffer, pending, done),
                            ));
                        }
                    };

                    for line in event_str.lines() {
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        // OpenAI sends "data: [DONE]" as the final event
                        if data == "[DONE]" {
                            pending.push_back(StreamEvent::MessageStop);
                            done = true;
                            break;
                        }

                        if let Some(events) = parse_stream_chunk(data) {
                            pending.extend(events);
                        }
                    }
                    continue;
                }

                // Need more data from the byte stream
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        // Raw CR only appears in CRLF line endings; JSON escapes it.
                        buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
                    }
                    Some(Err(e)) => {
                        done = true;
                        return Some((
                            Err(Error::Agent(format!("stream read error: {e}"))),
                            (stream, buffer, pending, done),
                        ));
                    }
                    None => return None,
                }
            }
        },
    );

    Box::pin(event_stream)
}

/// Offset of the blank line ending the first buffered frame.
fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

// --- OpenAI Wire Types (private) ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

/// Parse an OpenAI streaming chunk into one or more StreamEvents.
fn parse_stream_chunk(data: &str) -> Option<Vec<StreamEvent>> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data).ok()?;
    let choice = chunk.choices.first()?;
    let mut events = Vec::new();

    if let Some(content) = &choice.delta.content {
        if !content.is_empty() {
            events.push(StreamEvent::TextDelta(content.clone()));
        }
    }

    // finish_reason signals end of generation
    if let Some(reason) = &choice.finish_reason {
        let stop_reason = match reason.as_str() {
            "stop" => "end_turn".to_string(),
            "length" => "max_tokens".to_string(),
            other => other.to_string(),
        };

        let usage = chunk.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        events.push(StreamEvent::MessageDelta {
            stop_reason: Some(stop_reason),
            usage,
        });
    }

    if events.is_empty() {
        None
    } else {
        Some(events)
    }
}
