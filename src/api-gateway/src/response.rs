//! Response envelopes for gateway-originated responses

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{status: "success", message, data, meta}`
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    pub status: String,
    pub message: String,
    pub data: T,
    pub meta: Map<String, Value>,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data,
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// `{status: "error", message, stack?}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}
