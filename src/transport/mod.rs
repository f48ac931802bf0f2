//! Host transport: message model, origin derivation and routing

pub mod message;
pub mod origin;
pub mod router;

pub use message::{CallerMessage, Envelope, InboundMessage, Reply};
pub use origin::{origin_from_url, resolve_origin};
pub use router::Router;
