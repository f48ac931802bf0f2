//! Response returned to a capability caller

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ErrorBody;

/// Either the operation's payload or `{ "error": ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error { error: ErrorBody },
    Success(Value),
}

impl Response {
    pub fn success(value: impl Into<Value>) -> Self {
        Self::Success(value.into())
    }

    pub fn error(body: ErrorBody) -> Self {
        Self::Error { error: body }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Error message, if this is an error response
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error {
                error: ErrorBody::Message(message),
            }
            | Self::Error {
                error: ErrorBody::Detailed { message, .. },
            } => Some(message.as_str()),
            Self::Success(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Success(value) => value,
            Self::Error { error } => serde_json::json!({ "error": error }),
        }
    }
}
