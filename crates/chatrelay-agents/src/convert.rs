use chatrelay_common::{Turn, TurnRole};

use crate::providers::{ChatMessage, ChatRole};

impl From<TurnRole> for ChatRole {
    fn from(role: TurnRole) -> Self {
        match role {
            TurnRole::User => Self::User,
            TurnRole::Assistant => Self::Assistant,
            TurnRole::System => Self::System,
            TurnRole::Tool => Self::Tool,
        }
    }
}

/// Flatten conversation turns into the message list sent to the model.
/// Turns without any text are dropped.
pub fn to_chat_messages(turns: &[Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .filter_map(|turn| {
            let content = turn.text_content();
            if content.is_empty() {
                return None;
            }
            Some(ChatMessage {
                role: turn.role.into(),
                content,
            })
        })
        .collect()
}
