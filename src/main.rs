//! Keyward - permissioned signer for a single custodial key

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyward::{
    broker::{Broker, ChannelSurface},
    config::{Args, Command},
    crypto::{get_public_key, SecretKey},
    server,
    storage::{FileStore, KeyValueStore, MemoryStore, RelayPolicy},
    transport::Router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // stdout carries the protocol, logs go to stderr
    let log_level = args.log_level.clone();
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("keyward={},warn", log_level).into()),
    );
    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let store: Arc<dyn KeyValueStore> = match &args.store_path {
        Some(path) => Arc::new(
            FileStore::open(path)
                .await
                .with_context(|| format!("opening store {}", path.display()))?,
        ),
        None => {
            warn!("No store path configured, keys and permissions will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let (surface, surface_commands) = ChannelSurface::new(args.surface_config());
    let broker = Arc::new(Broker::new(store, Arc::new(surface), args.broker_config()));

    match args.command() {
        Command::Serve => {
            info!("======================================");
            info!("  Keyward - custodial key broker");
            info!("======================================");
            match &args.store_path {
                Some(path) => info!("Store: {}", path.display()),
                None => info!("Store: in-memory"),
            }
            info!("Prompt: {} ({}x{})", args.prompt_url, args.prompt_width, args.prompt_height);
            match args.consent_timeout_secs {
                Some(secs) => info!("Consent timeout: {}s", secs),
                None => info!("Consent timeout: none"),
            }
            info!("Expirable grants: {}s", args.expirable_ttl_secs);
            info!("Trusted origin: {}", args.trusted_origin);
            info!("======================================");

            if broker.keys().read_private_key().await?.is_none() {
                warn!("No private key stored yet, run `keyward keygen` or `keyward import-key`");
            }

            let router = Router::new(broker, args.trusted_origin.clone());
            server::run(router, surface_commands, tokio::io::stdin(), tokio::io::stdout()).await?;
        }

        Command::Keygen { force } => {
            ensure_replaceable(&broker, force).await?;
            let secret = SecretKey::generate();
            broker.keys().set_private_key(&secret).await?;
            println!("{}", get_public_key(&secret)?);
        }

        Command::ImportKey { secret, force } => {
            let secret = SecretKey::from_hex(&secret).context("parsing secret key")?;
            ensure_replaceable(&broker, force).await?;
            broker.keys().set_private_key(&secret).await?;
            println!("{}", get_public_key(&secret)?);
        }

        Command::PublicKey => match broker.keys().read_private_key().await? {
            Some(secret) => println!("{}", get_public_key(&secret)?),
            None => bail!("no private key found"),
        },

        Command::SetRelay { url, read, write } => {
            let mut relays = broker.keys().read_relays().await?.unwrap_or_default();
            relays.insert(url.clone(), RelayPolicy { read, write });
            broker.keys().set_relays(&relays).await?;
            info!(relay = %url, read, write, "Updated relay");
        }

        Command::Permissions => {
            for (origin, record) in broker.permissions().list().await? {
                println!("{}\t{}\t{}\t{}", origin, record.level, record.condition, record.created_at);
            }
        }

        Command::Revoke { origin } => {
            if !broker.permissions().remove(&origin).await? {
                bail!("{} has no standing permission", origin);
            }
        }
    }

    Ok(())
}

async fn ensure_replaceable(broker: &Broker, force: bool) -> anyhow::Result<()> {
    if !force && broker.keys().read_private_key().await?.is_some() {
        bail!("a private key is already stored, pass --force to replace it");
    }
    Ok(())
}
