//! Shared types for Keyward

pub mod error;
pub mod response;

pub use error::{BrokerError, ErrorBody, Result};
pub use response::Response;
