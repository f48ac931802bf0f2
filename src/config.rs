//! Configuration for Keyward
//!
//! CLI arguments and environment variable handling using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};

use crate::broker::{BrokerConfig, SurfaceConfig, DEFAULT_PROMPT_HEIGHT, DEFAULT_PROMPT_WIDTH};

/// Keyward - permissioned signer for a single custodial key
#[derive(Parser, Debug, Clone)]
#[command(name = "keyward")]
#[command(about = "Authorization broker for signing and encryption on one custodial key")]
pub struct Args {
    /// JSON file holding the key, relays and permissions (in-memory when unset)
    #[arg(long, env = "KEYWARD_STORE")]
    pub store_path: Option<PathBuf>,

    /// Base URL of the consent page
    #[arg(long, env = "PROMPT_URL", default_value = "prompt.html")]
    pub prompt_url: String,

    /// Consent popup width
    #[arg(long, env = "PROMPT_WIDTH", default_value_t = DEFAULT_PROMPT_WIDTH)]
    pub prompt_width: u32,

    /// Consent popup height
    #[arg(long, env = "PROMPT_HEIGHT", default_value_t = DEFAULT_PROMPT_HEIGHT)]
    pub prompt_height: u32,

    /// Deny a consent prompt left unanswered this long (waits forever when unset)
    #[arg(long, env = "CONSENT_TIMEOUT_SECS")]
    pub consent_timeout_secs: Option<u64>,

    /// Lifetime of grants given with the `expirable` condition
    #[arg(long, env = "EXPIRABLE_TTL_SECS", default_value = "300")]
    pub expirable_ttl_secs: u64,

    /// Origin assigned to in-process callers that do not declare one
    #[arg(long, env = "TRUSTED_ORIGIN", default_value = "keyward")]
    pub trusted_origin: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Keyward commands (defaults to `serve`)
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the broker over newline-delimited JSON on stdin/stdout
    Serve,

    /// Generate a new secret and store it
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Store an existing secret (64 hex chars)
    ImportKey {
        secret: String,
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Print the public key
    PublicKey,

    /// Add or update a preferred relay
    SetRelay {
        url: String,
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        read: bool,
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        write: bool,
    },

    /// List standing permissions
    Permissions,

    /// Revoke an origin's standing permission
    Revoke { origin: String },
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt_width == 0 || self.prompt_height == 0 {
            return Err("PROMPT_WIDTH and PROMPT_HEIGHT must be non-zero".to_string());
        }

        if self.expirable_ttl_secs == 0 {
            return Err("EXPIRABLE_TTL_SECS must be greater than zero".to_string());
        }

        if self.consent_timeout_secs == Some(0) {
            return Err("CONSENT_TIMEOUT_SECS must be greater than zero when set".to_string());
        }

        if self.trusted_origin.trim().is_empty() {
            return Err("TRUSTED_ORIGIN must not be empty".to_string());
        }

        Ok(())
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            consent_timeout: self.consent_timeout_secs.map(Duration::from_secs),
            expirable_ttl: Duration::from_secs(self.expirable_ttl_secs),
        }
    }

    pub fn surface_config(&self) -> SurfaceConfig {
        SurfaceConfig {
            prompt_url: self.prompt_url.clone(),
            width: self.prompt_width,
            height: self.prompt_height,
        }
    }
}
