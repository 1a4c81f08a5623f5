use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::Result;

/// Serialized frame body, shared by every recipient of one broadcast
pub type Payload = Arc<str>;

/// Chat message exchanged in both directions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Missing or null decodes as an empty string
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Decode an inbound frame body. Unknown fields are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        // Objects only; derived struct impls would also take arrays
        let object: Map<String, Value> = serde_json::from_slice(bytes)?;
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    /// Encode into the wire form
    pub fn encode(&self) -> Result<Payload> {
        Ok(serde_json::to_string(self)?.into())
    }
}

/// Notice sent back to a client whose frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
}

impl ErrorNotice {
    pub const INVALID_FORMAT: &'static str = "invalid message format";

    pub fn invalid_format() -> Self {
        Self {
            error: Self::INVALID_FORMAT.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Payload> {
        Ok(serde_json::to_string(self)?.into())
    }
}

fn null_as_default<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
