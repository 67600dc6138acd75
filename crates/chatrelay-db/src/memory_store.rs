use async_trait::async_trait;
use chatrelay_common::{ConversationId, Error, Result, Turn};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::record::{TurnRecord, derive_batch};
use crate::turn_store::TurnStore;

/// Process-local turn store. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryTurnStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    conversations: HashMap<String, DateTime<Utc>>,
    /// Rows in insertion order.
    turns: Vec<TurnRecord>,
    /// Turn id -> position in `turns`.
    index: HashMap<String, usize>,
}

impl InMemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Database("in-memory turn store lock poisoned".into()))
    }

    pub fn conversation_count(&self) -> Result<usize> {
        Ok(self.state()?.conversations.len())
    }
}

#[async_trait]
impl TurnStore for InMemoryTurnStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn records(&self, conversation_id: &ConversationId) -> Result<Vec<TurnRecord>> {
        let state = self.state()?;
        let mut records: Vec<TurnRecord> = state
            .turns
            .iter()
            .filter(|r| r.conversation_id == conversation_id.as_str())
            .cloned()
            .collect();
        // Stable sort: equal timestamps keep insertion order.
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn persist(&self, conversation_id: &ConversationId, turns: &[Turn]) -> Result<Vec<String>> {
        let stored = derive_batch(conversation_id, turns)?;
        let now = Utc::now();

        let mut guard = self.state()?;
        let state = &mut *guard;
        state
            .conversations
            .entry(conversation_id.to_string())
            .or_insert(now);

        let mut ids = Vec::with_capacity(stored.len());
        for turn in stored {
            if let Some(&pos) = state.index.get(&turn.id) {
                let existing = &mut state.turns[pos];
                existing.content = turn.content;
                existing.metadata = turn.metadata;
                existing.updated_at = now;
            } else {
                let pos = state.turns.len();
                state.index.insert(turn.id.clone(), pos);
                state.turns.push(TurnRecord {
                    id: turn.id.clone(),
                    conversation_id: turn.conversation_id,
                    role: turn.role,
                    content: turn.content,
                    metadata: turn.metadata,
                    created_at: now,
                    updated_at: now,
                });
            }
            ids.push(turn.id);
        }

        Ok(ids)
    }
}
