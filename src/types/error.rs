//! Error types for Keyward
use serde::{Deserialize, Serialize};

use crate::auth::PermissionLevel;

/// Main error type for Keyward operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Consent refused, or standing level insufficient
    #[error("insufficient permissions, required {required}")]
    PermissionDenied { required: PermissionLevel },

    #[error("no private key found")]
    MissingKey,

    #[error("invalid event")]
    InvalidEvent,

    #[error("unknown operation {0}")]
    UnknownOperation(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("consent surface error: {0}")]
    Surface(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// The `error` field of a failed response.
///
/// Policy errors travel as a bare message; failures raised while running an
/// operation carry a diagnostic trace as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Message(String),
    Detailed { message: String, stack: String },
}

impl BrokerError {
    /// Short variant name used in diagnostic traces
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "PermissionDenied",
            Self::MissingKey => "MissingKey",
            Self::InvalidEvent => "InvalidEvent",
            Self::UnknownOperation(_) => "UnknownOperation",
            Self::InvalidParams(_) => "InvalidParams",
            Self::Crypto(_) => "CryptoFailure",
            Self::Storage(_) => "Storage",
            Self::Surface(_) => "Surface",
            Self::Transport(_) => "Transport",
            Self::Internal(_) => "Internal",
        }
    }

    /// Convert to the error body sent back to the caller.
    ///
    /// `context` names the step that failed and is only used for the
    /// detailed form.
    pub fn into_body(self, context: &str) -> ErrorBody {
        match self {
            Self::PermissionDenied { .. }
            | Self::MissingKey
            | Self::InvalidEvent
            | Self::UnknownOperation(_) => ErrorBody::Message(self.to_string()),
            other => {
                let message = match &other {
                    Self::InvalidParams(m)
                    | Self::Crypto(m)
                    | Self::Storage(m)
                    | Self::Surface(m)
                    | Self::Transport(m)
                    | Self::Internal(m) => m.clone(),
                    _ => other.to_string(),
                };
                let stack = format!("{}: {}\n    at {}", other.kind(), message, context);
                ErrorBody::Detailed { message, stack }
            }
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidParams(format!("JSON error: {}", err))
    }
}

impl From<k256::elliptic_curve::Error> for BrokerError {
    fn from(err: k256::elliptic_curve::Error) -> Self {
        Self::Crypto(format!("elliptic curve error: {}", err))
    }
}

impl From<signature::Error> for BrokerError {
    fn from(err: signature::Error) -> Self {
        Self::Crypto(format!("signature error: {}", err))
    }
}

impl From<hex::FromHexError> for BrokerError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidParams(format!("hex error: {}", err))
    }
}

/// Result type alias for Keyward operations
pub type Result<T> = std::result::Result<T, BrokerError>;
