//! Keyward - permissioned signer for a single custodial key
//!
//! Untrusted callers ask for the public key, relay preferences, event
//! signatures and NIP-04 encryption. Keyward checks each request against the
//! permission the caller's origin already holds and, when that is not
//! enough, asks the user before the key is ever touched.
//!
//! ## Components
//!
//! - **Broker**: permission check, consent suspension and dispatch
//! - **Consent**: pending prompts and the surface that shows them
//! - **Storage**: key, relay and permission persistence
//! - **Crypto**: key derivation, event signing, NIP-04
//! - **Transport**: wire model, origin derivation and routing
//! - **Server**: newline-delimited JSON host loop

pub mod auth;
pub mod broker;
pub mod config;
pub mod crypto;
pub mod server;
pub mod storage;
pub mod transport;
pub mod types;

pub use broker::{Broker, BrokerConfig, CapabilityRequest};
pub use config::Args;
pub use server::run;
pub use types::{BrokerError, Response, Result};
