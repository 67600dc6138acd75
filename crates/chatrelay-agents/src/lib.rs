pub mod convert;
pub mod exchange;
pub mod openai;
pub mod providers;
pub mod runtime;

pub use exchange::{ChatEvent, Finalization};
pub use openai::OpenAiProvider;
pub use providers::{ChatMessage, ChatRole, EventStream, LlmProvider, LlmRequest, StreamEvent, Usage};
pub use runtime::{ChatRuntime, ChatSettings, ChatStream};
