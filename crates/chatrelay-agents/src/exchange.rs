use std::sync::Arc;

use chatrelay_common::{ConversationId, Turn, TurnRole};
use chatrelay_db::TurnStore;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::providers::{EventStream, StreamEvent};

/// Events delivered to the caller of [`crate::ChatRuntime::handle_turn`].
///
/// Every stream starts with `Start` and ends with exactly one of `Finish` or
/// `Error`, unless the caller hangs up first.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The assistant turn identifier, shared by the client and the store.
    Start { message_id: String },
    TextDelta(String),
    Finish { stop_reason: Option<String> },
    Error { message: String },
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Finalization {
    /// The provider signalled completion.
    Completed {
        text: String,
        stop_reason: Option<String>,
    },
    /// Upstream error, premature end of stream or elapsed deadline.
    Partial { text: String, reason: String },
    /// The caller dropped the stream.
    Cancelled { text: String },
}

impl Finalization {
    /// Assistant text accumulated before the exchange ended.
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text, .. } | Self::Partial { text, .. } | Self::Cancelled { text } => {
                text
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Partial { .. } => "partial",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// One request/response round trip, driven to completion by a spawned task.
pub(crate) struct Exchange {
    pub conversation_id: ConversationId,
    pub incoming: Turn,
    pub assistant_id: String,
    pub store: Arc<dyn TurnStore>,
    pub deadline: Option<Instant>,
    pub persist_partial: bool,
}

impl Exchange {
    /// Relay provider events to `tx`, then persist and report the outcome.
    pub(crate) async fn run(self, events: EventStream, tx: mpsc::Sender<ChatEvent>) -> Finalization {
        let start = ChatEvent::Start {
            message_id: self.assistant_id.clone(),
        };
        let outcome = if tx.send(start).await.is_err() {
            Finalization::Cancelled {
                text: String::new(),
            }
        } else {
            self.drain(events, &tx).await
        };

        self.finalize(&outcome, &tx).await;
        outcome
    }

    async fn drain(&self, mut events: EventStream, tx: &mpsc::Sender<ChatEvent>) -> Finalization {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let mut text = String::new();
        let mut stop_reason = None;

        loop {
            tokio::select! {
                biased;

                _ = tx.closed() => return Finalization::Cancelled { text },
                _ = &mut expired => {
                    return Finalization::Partial {
                        text,
                        reason: "model response timed out".to_string(),
                    };
                }
                next = events.next() => match next {
                    Some(Ok(StreamEvent::TextDelta(delta))) => {
                        if delta.is_empty() {
                            continue;
                        }
                        text.push_str(&delta);
                        if tx.send(ChatEvent::TextDelta(delta)).await.is_err() {
                            return Finalization::Cancelled { text };
                        }
                    }
                    Some(Ok(StreamEvent::MessageDelta { stop_reason: reason, .. })) => {
                        if reason.is_some() {
                            stop_reason = reason;
                        }
                    }
                    Some(Ok(StreamEvent::MessageStop)) => {
                        return Finalization::Completed { text, stop_reason };
                    }
                    Some(Err(e)) => {
                        return Finalization::Partial {
                            text,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        return Finalization::Partial {
                            text,
                            reason: "model stream ended before completion".to_string(),
                        };
                    }
                },
            }
        }
    }

    /// Turns to persist for `outcome`, or `None` when nothing is written.
    pub(crate) fn finalized_turns(&self, outcome: &Finalization) -> Option<Vec<Turn>> {
        let assistant = Turn::text(TurnRole::Assistant, outcome.text()).with_id(&self.assistant_id);

        match outcome {
            Finalization::Completed { .. } => Some(vec![self.incoming.clone(), assistant]),
            Finalization::Partial { text, reason } if self.persist_partial && !text.is_empty() => {
                let marked = assistant.with_field(
                    "metadata",
                    json!({ "status": "partial", "finishReason": reason }),
                );
                Some(vec![self.incoming.clone(), marked])
            }
            Finalization::Partial { .. } | Finalization::Cancelled { .. } => None,
        }
    }

    async fn finalize(&self, outcome: &Finalization, tx: &mpsc::Sender<ChatEvent>) {
        if let Some(turns) = self.finalized_turns(outcome) {
            match self.store.persist(&self.conversation_id, &turns).await {
                Ok(ids) => info!(
                    "persisted {} turns for conversation {} ({})",
                    ids.len(),
                    self.conversation_id,
                    outcome.label()
                ),
                Err(e) => {
                    warn!(
                        "failed to persist conversation {}: {}",
                        self.conversation_id, e
                    );
                    let _ = tx
                        .send(ChatEvent::Error {
                            message: format!("failed to save conversation: {e}"),
                        })
                        .await;
                    return;
                }
            }
        }

        let terminal = match outcome {
            Finalization::Completed { stop_reason, .. } => ChatEvent::Finish {
                stop_reason: stop_reason.clone(),
            },
            Finalization::Partial { reason, text } => {
                warn!(
                    "exchange for conversation {} ended early after {} chars: {}",
                    self.conversation_id,
                    text.len(),
                    reason
                );
                ChatEvent::Error {
                    message: reason.clone(),
                }
            }
            Finalization::Cancelled { text } => {
                warn!(
                    "client left conversation {} after {} chars, nothing saved",
                    self.conversation_id,
                    text.len()
                );
                return;
            }
        };

        let _ = tx.send(terminal).await;
    }
}
