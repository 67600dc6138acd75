use chatrelay_agents::ChatEvent;
use serde::Serialize;

/// Response header announcing the UI message stream protocol version.
pub const UI_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const UI_STREAM_VERSION: &str = "v1";

/// Final SSE payload after the last chunk.
pub const DONE_MARKER: &str = "[DONE]";

/// One chunk of the UI message stream, sent as the JSON `data` of an SSE event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiChunk {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    FinishStep,
    Finish,
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

/// Translates orchestrator events into UI stream chunks, opening and closing
/// the text block around the deltas.
#[derive(Debug, Default)]
pub struct UiStreamEncoder {
    text_id: Option<String>,
    text_open: bool,
}

impl UiStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, event: ChatEvent) -> Vec<UiChunk> {
        match event {
            ChatEvent::Start { message_id } => {
                self.text_id = Some(format!("{message_id}-text"));
                vec![UiChunk::Start { message_id }, UiChunk::StartStep]
            }
            ChatEvent::TextDelta(delta) => {
                let id = self.text_id().to_string();
                let mut chunks = Vec::with_capacity(2);
                if !self.text_open {
                    self.text_open = true;
                    chunks.push(UiChunk::TextStart { id: id.clone() });
                }
                chunks.push(UiChunk::TextDelta { id, delta });
                chunks
            }
            ChatEvent::Finish { .. } => {
                let mut chunks = self.close_text();
                chunks.push(UiChunk::FinishStep);
                chunks.push(UiChunk::Finish);
                chunks
            }
            ChatEvent::Error { message } => {
                let mut chunks = self.close_text();
                chunks.push(UiChunk::Error {
                    error_text: message,
                });
                chunks
            }
        }
    }

    fn text_id(&self) -> &str {
        self.text_id.as_deref().unwrap_or("text")
    }

    fn close_text(&mut self) -> Vec<UiChunk> {
        if !self.text_open {
            return Vec::new();
        }
        self.text_open = false;
        vec![UiChunk::TextEnd {
            id: self.text_id().to_string(),
        }]
    }
}
