//! Wire model for the host transport
//!
//! Every inbound line is an [`Envelope`]: a correlation id, the optional URL
//! of a cross-boundary sender, and the message itself. The message is either
//! a capability request from a caller or a decision from the consent surface;
//! decisions are recognised by `"prompt": true`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tracing::warn;

use crate::auth::GrantCondition;
use crate::broker::ConsentDecision;
use crate::types::{BrokerError, Response, Result};

/// One inbound transport frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id echoed in the reply
    pub id: Value,

    /// URL of the sending page when the caller is outside the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    pub message: Value,
}

/// Capability request as sent by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerMessage {
    #[serde(rename = "type")]
    pub operation: String,

    #[serde(default = "empty_params")]
    pub params: Value,

    /// Origin declared by an in-process caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Request(CallerMessage),
    Decision(ConsentDecision),
}

impl InboundMessage {
    /// Whether `value` comes from the consent surface
    pub fn is_prompt(value: &Value) -> bool {
        value
            .get("prompt")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Classify and decode a raw message.
    ///
    /// A decision that carries an id but is otherwise unreadable resolves
    /// as a refusal, so its prompt is not left hanging.
    pub fn from_value(value: Value) -> Result<Self> {
        if Self::is_prompt(&value) {
            match ConsentDecision::deserialize(&value) {
                Ok(decision) => Ok(Self::Decision(decision)),
                Err(e) => match value.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        warn!(consent_id = %id, error = %e, "Unreadable decision, treating as refusal");
                        Ok(Self::Decision(ConsentDecision::new(id, GrantCondition::No)))
                    }
                    None => Err(BrokerError::InvalidParams(format!("malformed decision: {e}"))),
                },
            }
        } else {
            let request = serde_json::from_value(value)
                .map_err(|e| BrokerError::InvalidParams(format!("malformed request: {e}")))?;
            Ok(Self::Request(request))
        }
    }
}

/// Reply to one caller request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: Value,
    pub response: Response,
}
