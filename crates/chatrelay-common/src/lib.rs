pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{Turn, TurnPart, TurnRole};
pub use types::{ConversationId, TurnId};
