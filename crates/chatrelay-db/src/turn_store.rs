use async_trait::async_trait;
use chatrelay_common::{ConversationId, Result, Turn};

use crate::record::TurnRecord;

/// Durable home for conversation turns.
///
/// One implementation is selected per deployment; tests swap in
/// [`crate::InMemoryTurnStore`].
#[async_trait]
pub trait TurnStore: Send + Sync {
    /// Backend identifier (e.g. "sqlite", "memory").
    fn backend(&self) -> &str;

    /// All stored turns of a conversation in ascending creation order.
    /// Unknown conversations yield an empty list.
    async fn records(&self, conversation_id: &ConversationId) -> Result<Vec<TurnRecord>>;

    /// Upsert `turns` into the conversation, creating the conversation if it
    /// does not exist yet. Turns without an id get one assigned. Returns the
    /// stored ids in input order.
    ///
    /// The whole batch is applied as one unit.
    async fn persist(&self, conversation_id: &ConversationId, turns: &[Turn]) -> Result<Vec<String>>;

    /// Stored turns rebuilt into the in-memory shape, in conversation order.
    async fn load(&self, conversation_id: &ConversationId) -> Result<Vec<Turn>> {
        let records = self.records(conversation_id).await?;
        Ok(records.into_iter().map(TurnRecord::into_turn).collect())
    }
}
