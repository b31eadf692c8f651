//! pairchat core library
//!
//! Serverless two-party encrypted chat: peers find each other through
//! WebTorrent-style rendezvous servers, talk over direct connections, and
//! exchange messages as entries of two append-only replicated logs.
//!
//! ## Overview
//!
//! - **Discovery**: both parties derive an announce topic from a shared
//!   secret and trade encrypted offers/answers through rendezvous servers
//! - **Multiplexing**: one peer connection carries several logical channels,
//!   each frame tagged with a channel kind and index
//! - **Sync**: each party writes its own log; the peer replicates it after
//!   learning its address from a lighthouse on the control channel
//! - **View**: entries of both logs are decrypted and merged by sender
//!   timestamp
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use pairchat_core::{
//!     ChatConfig, ChatSession, DiscoveryManager, MemoryLogOpener, Participant, PeerId,
//!     ShareSecret, WsTrackerConnector,
//! };
//!
//! let config = ChatConfig::default();
//! let discovery = DiscoveryManager::new(
//!     config.discovery.clone(),
//!     PeerId::random(),
//!     Arc::new(WsTrackerConnector),
//!     connector,
//! );
//! let chat = ChatSession::open(
//!     ShareSecret::new(b"agreed out of band".to_vec()),
//!     Participant::Creator,
//!     discovery,
//!     Arc::new(MemoryLogOpener::new()),
//!     config,
//! )
//! .await?;
//! chat.init().await?;
//! chat.send_message("hello").await?;
//! ```

pub mod chat;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod log;
pub mod logging;
pub mod mux;
pub mod sync;
pub mod transport;
pub mod types;
pub mod view;

// Re-exports
pub use chat::{ChatEvent, ChatSession, Participant, UserMessage};
pub use config::{ChatConfig, DiscoveryConfig, RetryPolicy, SyncConfig, ViewConfig};
pub use crypto::{CryptoService, EntryCrypto, SignalingKey};
pub use discovery::{
    DiscoveryEvent, DiscoveryManager, MemoryTracker, TrackerConnector, TrackerMessage,
    WsTrackerConnector,
};
pub use error::{ChatError, ChatResult};
pub use log::{LogEvent, LogOpener, MemoryLog, MemoryLogOpener, ReplicatedLog};
pub use mux::{channel_index, ChannelEnvelope, ChannelKind, ChannelTag};
pub use sync::{LogRole, SyncEngine, SyncStatus};
pub use transport::{MemoryConnector, PeerConnection, PeerConnector, SignalData};
pub use types::*;
pub use view::{MessageView, ViewEvent, ViewMessage};
