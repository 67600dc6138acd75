use chatrelay_common::{ConversationId, Error, Result, Turn, TurnId, TurnPart, TurnRole};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Top-level turn fields that never become metadata.
const RESERVED_FIELDS: [&str; 3] = ["id", "role", "parts"];

/// A persisted turn row, as read back from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: TurnRole,
    pub content: String,
    pub metadata: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TurnRecord {
    /// Rebuild the in-memory turn: one text part holding `content`, with the
    /// stored metadata merged back as top-level fields.
    pub fn into_turn(self) -> Turn {
        let mut extra = Map::new();
        if let Some(metadata) = self.metadata {
            for (key, value) in metadata {
                if !RESERVED_FIELDS.contains(&key.as_str()) {
                    extra.insert(key, value);
                }
            }
        }

        Turn {
            id: self.id,
            role: self.role,
            parts: vec![TurnPart::text(self.content)],
            extra,
        }
    }
}

/// Write shape derived from an in-memory turn right before an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTurn {
    pub id: String,
    pub conversation_id: String,
    pub role: TurnRole,
    pub content: String,
    pub metadata: Option<Map<String, Value>>,
}

impl StoredTurn {
    pub fn derive(conversation_id: &ConversationId, turn: &Turn) -> Result<Self> {
        let id = if turn.has_id() {
            turn.id.clone()
        } else {
            let generated = TurnId::new().to_string();
            debug!("assigned id {generated} to {} turn", turn.role);
            generated
        };

        Ok(Self {
            id,
            conversation_id: conversation_id.to_string(),
            role: turn.role,
            content: turn.text_content(),
            metadata: sanitize_metadata(&turn.extra)?,
        })
    }

    /// Metadata as the JSON text stored in the `metadata` column.
    pub fn metadata_json(&self) -> Result<Option<String>> {
        self.metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Database(format!("failed to serialize turn metadata: {e}")))
    }
}

/// Derive the stored shape of every turn in a batch. Fails before anything
/// is written, so stores can apply the result as one unit.
pub fn derive_batch(conversation_id: &ConversationId, turns: &[Turn]) -> Result<Vec<StoredTurn>> {
    if conversation_id.is_blank() {
        return Err(Error::Validation("conversation id is required".into()));
    }

    turns
        .iter()
        .map(|turn| StoredTurn::derive(conversation_id, turn))
        .collect()
}

/// Reduce side-channel fields to plain JSON data. Reserved keys and `null`
/// values are dropped; an empty result means "no metadata".
pub fn sanitize_metadata(extra: &Map<String, Value>) -> Result<Option<Map<String, Value>>> {
    let encoded = serde_json::to_string(extra)
        .map_err(|e| Error::Database(format!("turn metadata is not serializable: {e}")))?;
    let decoded: Map<String, Value> = serde_json::from_str(&encoded)
        .map_err(|e| Error::Database(format!("turn metadata did not round-trip: {e}")))?;

    let cleaned: Map<String, Value> = decoded
        .into_iter()
        .filter(|(key, value)| !value.is_null() && !RESERVED_FIELDS.contains(&key.as_str()))
        .collect();

    Ok(if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    })
}

/// Fixed-width UTC timestamp so that lexical order matches time order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }

    Err(Error::Database(format!("invalid timestamp format: {raw}")))
}
