use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chatrelay_common::{ConversationId, Error, Result, Turn, TurnId};
use chatrelay_db::TurnStore;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, instrument};

use crate::convert::to_chat_messages;
use crate::exchange::{ChatEvent, Exchange, Finalization};
use crate::providers::{LlmProvider, LlmRequest};

/// Buffered events between the exchange task and the caller.
const EVENT_BUFFER: usize = 64;

/// Per-deployment knobs forwarded to every exchange.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Passed to the provider unmodified. `None` selects the provider default.
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    /// Upper bound on one model call, measured from the request.
    pub max_duration: Option<Duration>,
    /// Keep partial assistant output when the model stream breaks off.
    pub persist_partial: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: None,
            system_prompt: None,
            max_tokens: None,
            max_duration: Some(Duration::from_secs(30)),
            persist_partial: true,
        }
    }
}

/// Loads history, forwards it to the model and persists finished exchanges.
pub struct ChatRuntime {
    providers: Vec<Box<dyn LlmProvider>>,
    default_provider: Option<String>,
    store: Arc<dyn TurnStore>,
    settings: ChatSettings,
}

impl ChatRuntime {
    pub fn new(store: Arc<dyn TurnStore>, settings: ChatSettings) -> Self {
        Self {
            providers: Vec::new(),
            default_provider: None,
            store,
            settings,
        }
    }

    pub fn register_provider(&mut self, provider: Box<dyn LlmProvider>) {
        let id = provider.provider_id().to_string();
        info!("registered LLM provider: {}", id);
        if self.default_provider.is_none() {
            self.default_provider = Some(id);
        }
        self.providers.push(provider);
    }

    pub fn get_provider(&self, id: &str) -> Option<&dyn LlmProvider> {
        self.providers
            .iter()
            .find(|p| p.provider_id() == id)
            .map(|p| p.as_ref())
    }

    pub fn default_provider(&self) -> Option<&dyn LlmProvider> {
        self.default_provider
            .as_ref()
            .and_then(|id| self.get_provider(id))
    }

    pub fn store(&self) -> &Arc<dyn TurnStore> {
        &self.store
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Model name requests will carry, as far as it is known up front.
    pub fn effective_model(&self) -> Option<&str> {
        self.settings
            .model
            .as_deref()
            .or_else(|| self.default_provider().and_then(|p| p.configured_model()))
    }

    /// Start an exchange for `incoming` on top of the stored history.
    ///
    /// Fails when the conversation id is blank, the history cannot be read, or
    /// the model request is rejected before any output. Once a stream is
    /// returned the outcome is reported through its events.
    #[instrument(skip(self, incoming), fields(conversation_id = %conversation_id, provider_id))]
    pub async fn handle_turn(
        &self,
        conversation_id: ConversationId,
        incoming: Turn,
    ) -> Result<ChatStream> {
        if conversation_id.is_blank() {
            return Err(Error::Validation("conversation id is required".into()));
        }

        let provider = self
            .default_provider()
            .ok_or_else(|| Error::Agent("no LLM provider configured".into()))?;
        tracing::Span::current().record("provider_id", provider.provider_id());

        let mut history = self.store.load(&conversation_id).await?;
        history.push(incoming.clone());

        let request = LlmRequest {
            model: self.settings.model.clone().unwrap_or_default(),
            messages: to_chat_messages(&history),
            system: self.settings.system_prompt.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: None,
        };

        // A duration too large to represent means no deadline.
        let deadline = self
            .settings
            .max_duration
            .and_then(|d| Instant::now().checked_add(d));
        let events = match deadline {
            Some(at) => tokio::time::timeout_at(at, provider.stream_complete(&request))
                .await
                .map_err(|_| Error::Agent("model request timed out".into()))??,
            None => provider.stream_complete(&request).await?,
        };

        let message_id = TurnId::new().to_string();
        info!(
            "streaming reply {} over {} prior turns",
            message_id,
            history.len() - 1
        );

        let exchange = Exchange {
            conversation_id,
            incoming,
            assistant_id: message_id.clone(),
            store: Arc::clone(&self.store),
            deadline,
            persist_partial: self.settings.persist_partial,
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(exchange.run(events, tx));

        Ok(ChatStream {
            message_id,
            events: ReceiverStream::new(rx),
            task: Some(task),
        })
    }
}

/// Live view of one exchange. Dropping it cancels the model call; nothing is
/// persisted in that case.
pub struct ChatStream {
    message_id: String,
    events: ReceiverStream<ChatEvent>,
    task: Option<JoinHandle<Finalization>>,
}

impl ChatStream {
    /// Identifier of the assistant turn being generated.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Handle resolving to the exchange outcome once it is finalized.
    pub fn take_finalization(&mut self) -> Option<JoinHandle<Finalization>> {
        self.task.take()
    }
}

impl Stream for ChatStream {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
