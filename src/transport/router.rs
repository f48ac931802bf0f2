//! Dispatch of inbound envelopes to the broker

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::message::{Envelope, InboundMessage, Reply};
use super::origin::resolve_origin;
use crate::broker::{Broker, CapabilityRequest};
use crate::types::Response;

/// Routes caller requests and consent decisions to a [`Broker`]
#[derive(Clone)]
pub struct Router {
    broker: Arc<Broker>,
    trusted_origin: String,
}

impl Router {
    pub fn new(broker: Arc<Broker>, trusted_origin: impl Into<String>) -> Self {
        Self {
            broker,
            trusted_origin: trusted_origin.into(),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Handle one envelope. Caller requests always get a reply; decisions
    /// never do.
    pub async fn route(&self, envelope: Envelope) -> Option<Reply> {
        let Envelope {
            id,
            sender,
            message,
        } = envelope;

        let is_prompt = InboundMessage::is_prompt(&message);
        let message = match InboundMessage::from_value(message) {
            Ok(message) => message,
            Err(e) => {
                error!(id = %id, error = %e, "Failed to decode inbound message");
                if is_prompt {
                    return None;
                }
                return Some(Reply {
                    id,
                    response: Response::error(e.into_body("decode")),
                });
            }
        };

        match message {
            InboundMessage::Decision(decision) => {
                if let Some(sender) = sender {
                    warn!(sender = %sender, consent_id = %decision.id, "Ignoring decision from external sender");
                    return None;
                }
                self.broker.handle_decision(decision).await;
                None
            }
            InboundMessage::Request(request) => {
                let origin = match resolve_origin(
                    sender.as_deref(),
                    request.host.as_deref(),
                    &self.trusted_origin,
                ) {
                    Ok(origin) => origin,
                    Err(e) => {
                        warn!(id = %id, error = %e, "Could not determine requesting origin");
                        return Some(Reply {
                            id,
                            response: Response::error(e.into_body("resolve origin")),
                        });
                    }
                };

                debug!(id = %id, origin = %origin, operation = %request.operation, "Dispatching request");
                let response = self
                    .broker
                    .handle_request(CapabilityRequest::new(request.operation, request.params, origin))
                    .await;
                Some(Reply { id, response })
            }
        }
    }
}
