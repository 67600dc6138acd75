use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One message exchanged in a conversation, in the structured shape the chat
/// client and the model runtime exchange.
///
/// Fields other than `id`, `role` and `parts` are kept verbatim in `extra`
/// and round-trip through storage as turn metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub id: String,
    pub role: TurnRole,
    #[serde(default)]
    pub parts: Vec<TurnPart>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Turn {
    pub fn new(role: TurnRole, parts: Vec<TurnPart>) -> Self {
        Self {
            id: String::new(),
            role,
            parts,
            extra: Map::new(),
        }
    }

    /// A turn holding a single text part.
    pub fn text(role: TurnRole, text: impl Into<String>) -> Self {
        Self::new(role, vec![TurnPart::text(text)])
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// True when the turn carries a usable identifier.
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Concatenation of every text part, in order. Other parts are skipped.
    pub fn text_content(&self) -> String {
        self.parts.iter().filter_map(TurnPart::as_text).collect()
    }
}

/// A structured segment of a turn. Only `text` parts are understood here;
/// every other part type is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TurnPart {
    pub const TEXT: &'static str = "text";

    pub fn text(text: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("text".to_string(), Value::String(text.into()));
        Self {
            kind: Self::TEXT.to_string(),
            fields,
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == Self::TEXT
    }

    pub fn as_text(&self) -> Option<&str> {
        if !self.is_text() {
            return None;
        }
        self.fields.get("text").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(Error::Validation(format!("unknown turn role: {other}"))),
        }
    }
}
