//! Runtime configuration
//!
//! Every knob that used to be an implicit constant is carried here and passed
//! to components at construction. All structs deserialize from JSON with
//! missing fields falling back to [`Default`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default public WebTorrent-compatible trackers.
pub const DEFAULT_TRACKER_URLS: &[&str] = &[
    "wss://tracker.openwebtorrent.com",
    "wss://tracker.btorrent.xyz",
    "wss://tracker.files.fm:7073/announce",
];

/// Default number of pre-built offers per announcement.
pub const DEFAULT_OFFER_POOL_SIZE: usize = 10;

/// Default re-announce period in seconds.
pub const DEFAULT_ANNOUNCE_SECS: u64 = 33;

/// Upper bound for tracker-suggested re-announce periods.
pub const MAX_ANNOUNCE_SECS: u64 = 120;

/// Configuration for the peer discovery manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Application identifier mixed into the announce topic
    pub app_id: String,
    /// Protocol version mixed into the announce topic
    pub protocol_version: String,
    /// Rendezvous servers to connect to
    pub tracker_urls: Vec<String>,
    /// Offers created per announcement
    pub offer_pool_size: usize,
    /// Initial re-announce period (seconds)
    pub announce_interval_secs: u64,
    /// Largest re-announce period a tracker may impose (seconds)
    pub max_announce_interval_secs: u64,
    /// Namespace for the signaling key derivation
    pub signaling_namespace: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            app_id: "pairchat".to_string(),
            protocol_version: "0.1.0".to_string(),
            tracker_urls: DEFAULT_TRACKER_URLS.iter().map(|s| s.to_string()).collect(),
            offer_pool_size: DEFAULT_OFFER_POOL_SIZE,
            announce_interval_secs: DEFAULT_ANNOUNCE_SECS,
            max_announce_interval_secs: MAX_ANNOUNCE_SECS,
            signaling_namespace: "SDP".to_string(),
        }
    }
}

impl DiscoveryConfig {
    /// Config with the given trackers and defaults elsewhere.
    pub fn with_trackers(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tracker_urls: urls.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }
}

/// Bounded retry policy for replication setup.
///
/// Only timeout-class failures are retried, immediately, and at most
/// `max_retries` times per peer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

/// Configuration for a log synchronization engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often the origin side re-broadcasts its log address (milliseconds)
    pub lighthouse_period_ms: u64,
    /// Replication retry policy
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lighthouse_period_ms: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn lighthouse_period(&self) -> Duration {
        Duration::from_millis(self.lighthouse_period_ms)
    }
}

/// Configuration for the message view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Messages requested per page when scrolling back
    pub page_size: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self { page_size: 10 }
    }
}

/// Top-level configuration for a chat session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub discovery: DiscoveryConfig,
    pub sync: SyncConfig,
    pub view: ViewConfig,
}

impl ChatConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.discovery.offer_pool_size, 10);
        assert_eq!(config.discovery.announce_interval(), Duration::from_secs(33));
        assert_eq!(config.discovery.max_announce_interval_secs, 120);
        assert_eq!(config.sync.retry.max_retries, 1);
        assert_eq!(config.view.page_size, 10);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = ChatConfig::from_json(
            r#"{"discovery": {"tracker_urls": ["ws://localhost:8000"]}, "sync": {"lighthouse_period_ms": 50}}"#,
        )
        .unwrap();
        assert_eq!(config.discovery.tracker_urls, vec!["ws://localhost:8000".to_string()]);
        assert_eq!(config.discovery.offer_pool_size, DEFAULT_OFFER_POOL_SIZE);
        assert_eq!(config.sync.lighthouse_period(), Duration::from_millis(50));
        assert_eq!(config.sync.retry, RetryPolicy::default());
    }
}
