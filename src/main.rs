//! pairchat CLI
//!
//! Thin wrapper around pairchat-core for inspecting derived identifiers and
//! running an in-process demo conversation.
//!
//! ## Usage
//!
//! ```bash
//! # Print the announce topic two parties derive from a secret
//! pairchat topic "correct horse battery staple"
//!
//! # Print the channel index of a log between two peers
//! pairchat channel-index <topic>/creator <origin-peer-id> <replica-peer-id>
//!
//! # Run two parties end to end over in-memory collaborators
//! pairchat -vv --log-dir ./logs demo --messages 3
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pairchat_core::logging::{env_filter, JsonlLayer};
use pairchat_core::{
    channel_index, AnnounceTopic, ChatConfig, ChatSession, DiscoveryConfig, DiscoveryManager,
    MemoryConnector, MemoryLogOpener, MemoryTracker, Participant, PeerId, ShareSecret, SyncStatus,
    ViewMessage,
};
use tracing::info;
use tracing_subscriber::prelude::*;

/// pairchat - serverless two-party encrypted chat
#[derive(Parser)]
#[command(name = "pairchat")]
#[command(version = "0.1.0")]
#[command(about = "Serverless two-party encrypted chat")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write JSONL traces to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Instance name used for the JSONL trace file
    #[arg(long, global = true, default_value = "pairchat")]
    instance: String,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the announce topic derived from a shared secret
    Topic {
        secret: String,
    },

    /// Print the channel index of a named log between two peers
    ChannelIndex {
        name: String,
        origin_id: String,
        replica_id: String,
    },

    /// Run a creator and a joiner in this process and print the merged view
    Demo {
        /// Messages each party sends
        #[arg(short, long, default_value_t = 2)]
        messages: usize,

        /// Shared secret for the demo conversation
        #[arg(long, default_value = "pairchat demo secret")]
        secret: String,
    },
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>, instance: &str) -> Result<()> {
    let jsonl = log_dir
        .map(|dir| JsonlLayer::new(dir, instance))
        .transpose()
        .context("failed to open JSONL log file")?;

    tracing_subscriber::registry()
        .with(env_filter(verbosity))
        .with(tracing_subscriber::fmt::layer())
        .with(jsonl)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ChatConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ChatConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
        }
        None => Ok(ChatConfig::default()),
    }
}

fn format_message(message: &ViewMessage) -> String {
    let who = if message.participant == Participant::Creator.tag() {
        "creator"
    } else {
        "joiner"
    };
    let when = chrono::DateTime::from_timestamp_millis(message.timestamp)
        .map(|dt| dt.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "?".to_string());
    format!("[{when}] {who:>7}: {}", message.text)
}

async fn wait_until(what: &str, check: impl Fn() -> bool) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(15), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .with_context(|| format!("timed out waiting for {what}"))
}

async fn run_demo(mut config: ChatConfig, secret: ShareSecret, messages: usize) -> Result<()> {
    // Both parties share one in-memory relay regardless of configured servers.
    config.discovery = DiscoveryConfig {
        tracker_urls: vec!["memory://demo".to_string()],
        ..config.discovery
    };
    let tracker = MemoryTracker::new();
    let connector = MemoryConnector::new();

    let open = |participant: Participant| {
        let discovery = DiscoveryManager::new(
            config.discovery.clone(),
            PeerId::random(),
            Arc::new(tracker.clone()),
            Arc::new(connector.clone()),
        );
        ChatSession::open(
            secret.clone(),
            participant,
            discovery,
            Arc::new(MemoryLogOpener::new()),
            config.clone(),
        )
    };
    let creator = open(Participant::Creator).await?;
    let joiner = open(Participant::Joiner).await?;
    println!("Topic: {}", creator.topic());

    creator.init().await?;
    joiner.init().await?;
    wait_until("creator to go online", || creator.online_status() == SyncStatus::Online).await?;
    wait_until("joiner to go online", || joiner.online_status() == SyncStatus::Online).await?;
    info!("Both parties online");

    for i in 0..messages {
        creator.send_message(&format!("creator message {}", i + 1)).await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
        joiner.send_message(&format!("joiner message {}", i + 1)).await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let total = messages * 2;
    wait_until("creator to see every message", || creator.messages().len() >= total).await?;
    wait_until("joiner to see every message", || joiner.messages().len() >= total).await?;

    println!();
    println!("Joiner's view ({} messages):", joiner.messages().len());
    for message in joiner.messages() {
        println!("  {}", format_message(&message));
    }

    creator.destroy();
    joiner.destroy();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir.as_deref(), &cli.instance)?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Topic { secret } => {
            let topic = AnnounceTopic::derive(
                &ShareSecret::new(secret.into_bytes()),
                &config.discovery.app_id,
                &config.discovery.protocol_version,
            );
            println!("{}", topic);
        }

        Commands::ChannelIndex {
            name,
            origin_id,
            replica_id,
        } => {
            let origin = PeerId::from(origin_id);
            let replica = PeerId::from(replica_id);
            let idx = channel_index(&name, &origin, &replica, true);
            println!("{}", idx);
        }

        Commands::Demo { messages, secret } => {
            run_demo(config, ShareSecret::new(secret.into_bytes()), messages).await?;
        }
    }

    Ok(())
}
