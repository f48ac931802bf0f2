//! Requesting-origin derivation
//!
//! In-process callers declare their origin (or get the trusted one);
//! cross-boundary callers are identified by the host of their sender URL and
//! cannot override it.

use url::Url;

use crate::types::{BrokerError, Result};

/// Origin of a request.
///
/// `sender` is the URL of a cross-boundary caller, `declared` the `host`
/// field of the message.
pub fn resolve_origin(
    sender: Option<&str>,
    declared: Option<&str>,
    trusted_origin: &str,
) -> Result<String> {
    match sender {
        Some(sender) => origin_from_url(sender),
        None => Ok(declared
            .filter(|host| !host.is_empty())
            .unwrap_or(trusted_origin)
            .to_string()),
    }
}

/// Host (with non-default port) of `sender`.
pub fn origin_from_url(sender: &str) -> Result<String> {
    let url = Url::parse(sender)
        .map_err(|e| BrokerError::InvalidParams(format!("bad sender url {sender}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| BrokerError::InvalidParams(format!("sender url {sender} has no host")))?;

    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
