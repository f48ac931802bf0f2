//! The authorization broker and its consent machinery
//!
//! - [`consent`]: the table of prompts awaiting an answer
//! - [`surface`]: the interactive prompt abstraction
//! - [`service`]: the [`Broker`] that ties permissions, consent and keys together

pub mod consent;
pub mod service;
pub mod surface;

pub use consent::{ConsentDecision, ConsentOutcome, ConsentTable, DenialReason, PendingConsent};
pub use service::{Broker, BrokerConfig, CapabilityRequest};
pub use surface::{
    ChannelSurface, ConsentPrompt, ConsentSurface, SurfaceCommand, SurfaceConfig, SurfaceHandle,
    DEFAULT_PROMPT_HEIGHT, DEFAULT_PROMPT_WIDTH,
};
