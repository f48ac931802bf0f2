//! The consent surface: the interactive prompt the user answers.
//!
//! The broker only needs to open a prompt and later dismiss it. Rendering
//! and input are the surface's business; it reports back through a
//! [`ConsentDecision`](super::ConsentDecision).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::{permissions_string, PermissionLevel};
use crate::types::{BrokerError, Result};

/// Default popup size for the consent dialog
pub const DEFAULT_PROMPT_WIDTH: u32 = 600;
pub const DEFAULT_PROMPT_HEIGHT: u32 = 400;

/// Opaque handle identifying an open surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceHandle(String);

impl SurfaceHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What the user is asked to approve
#[derive(Debug, Clone, PartialEq)]
pub struct ConsentPrompt {
    pub id: String,
    pub host: String,
    pub level: PermissionLevel,
    pub params: Value,
}

#[derive(Serialize)]
struct PromptQuery<'a> {
    host: &'a str,
    level: u8,
    id: &'a str,
    params: String,
    description: String,
}

impl ConsentPrompt {
    /// What the requested level would allow, in words
    pub fn description(&self) -> String {
        permissions_string(self.level)
    }

    /// URL-encoded `host`, `level`, `id`, JSON `params` and `description`.
    pub fn query_string(&self) -> Result<String> {
        let params = serde_json::to_string(&self.params)
            .map_err(|e| BrokerError::Internal(format!("failed to encode prompt params: {e}")))?;
        serde_urlencoded::to_string(PromptQuery {
            host: &self.host,
            level: self.level.value(),
            id: &self.id,
            params,
            description: self.description(),
        })
        .map_err(|e| BrokerError::Internal(format!("failed to encode prompt query: {e}")))
    }

    /// Full prompt URL under `base`.
    pub fn url(&self, base: &str) -> Result<String> {
        let separator = if base.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}", base, separator, self.query_string()?))
    }
}

/// Something that can show a consent prompt and take it down again.
#[async_trait]
pub trait ConsentSurface: Send + Sync {
    /// Show the prompt. The returned handle is later passed to [`close`].
    ///
    /// [`close`]: ConsentSurface::close
    async fn open(&self, prompt: &ConsentPrompt) -> Result<SurfaceHandle>;

    /// Dismiss a surface. Fire-and-forget: failures are logged, not returned.
    fn close(&self, handle: &SurfaceHandle);
}

/// Instruction for whoever renders prompts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "surface", rename_all = "lowercase")]
pub enum SurfaceCommand {
    Open {
        handle: SurfaceHandle,
        url: String,
        width: u32,
        height: u32,
        description: String,
    },
    Close {
        handle: SurfaceHandle,
    },
}

/// Configuration for [`ChannelSurface`]
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// Base URL of the consent page
    pub prompt_url: String,
    pub width: u32,
    pub height: u32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            prompt_url: "prompt.html".to_string(),
            width: DEFAULT_PROMPT_WIDTH,
            height: DEFAULT_PROMPT_HEIGHT,
        }
    }
}

/// Surface that emits open/close instructions on a channel.
///
/// The host side of the channel renders a popup for each `Open` and tears it
/// down on `Close`.
#[derive(Debug, Clone)]
pub struct ChannelSurface {
    config: SurfaceConfig,
    commands: mpsc::UnboundedSender<SurfaceCommand>,
}

impl ChannelSurface {
    pub fn new(config: SurfaceConfig) -> (Self, mpsc::UnboundedReceiver<SurfaceCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { config, commands }, rx)
    }
}

#[async_trait]
impl ConsentSurface for ChannelSurface {
    async fn open(&self, prompt: &ConsentPrompt) -> Result<SurfaceHandle> {
        let handle = SurfaceHandle::new(prompt.id.clone());
        let command = SurfaceCommand::Open {
            handle: handle.clone(),
            url: prompt.url(&self.config.prompt_url)?,
            width: self.config.width,
            height: self.config.height,
            description: prompt.description(),
        };

        self.commands
            .send(command)
            .map_err(|_| BrokerError::Surface("surface channel closed".into()))?;

        debug!(handle = %handle.as_str(), host = %prompt.host, "Opened consent surface");
        Ok(handle)
    }

    fn close(&self, handle: &SurfaceHandle) {
        let command = SurfaceCommand::Close {
            handle: handle.clone(),
        };
        if self.commands.send(command).is_err() {
            warn!(handle = %handle.as_str(), "Surface channel closed, cannot dismiss prompt");
        } else {
            debug!(handle = %handle.as_str(), "Closed consent surface");
        }
    }
}
