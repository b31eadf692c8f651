//! Channel envelope wire format
//!
//! ```text
//! +-----------------+-----------------+--------------------+
//! | channel (varint)| idx (varint u32)| message (len+bytes)|
//! +-----------------+-----------------+--------------------+
//! ```
//!
//! Encoded with postcard.

use serde::{Deserialize, Serialize};

use crate::error::ChatResult;
use crate::types::PeerId;

/// Logical channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Bootstrap traffic (log address lighthouse)
    ControlKeyExchange = 0,
    /// Log replication traffic
    UserChannel = 1,
}

/// Full address of a logical channel on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelTag {
    pub kind: ChannelKind,
    pub idx: u32,
}

impl ChannelTag {
    pub fn new(kind: ChannelKind, idx: u32) -> Self {
        Self { kind, idx }
    }
}

/// One multiplexed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEnvelope {
    pub channel: ChannelKind,
    pub idx: u32,
    pub message: Vec<u8>,
}

impl ChannelEnvelope {
    pub fn new(tag: ChannelTag, message: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: tag.kind,
            idx: tag.idx,
            message: message.into(),
        }
    }

    pub fn tag(&self) -> ChannelTag {
        ChannelTag::new(self.channel, self.idx)
    }

    /// Encode envelope to bytes using postcard
    pub fn encode(&self) -> ChatResult<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Decode envelope from bytes using postcard
    pub fn decode(data: &[u8]) -> ChatResult<Self> {
        Ok(postcard::from_bytes(data)?)
    }
}

/// Derive the channel index for a named channel between two peers.
///
/// The pair is always ordered origin-first: the side that owns the channel
/// passes `is_origin = true` and both ends compute the same string
///
/// ```text
/// "<channel_name>:<origin_id>,<replica_id>"
/// ```
///
/// The index is the CRC-32 (IEEE) checksum of that string. Distinct inputs
/// may collide; with two peers per connection this is accepted.
pub fn channel_index(channel_name: &str, local: &PeerId, remote: &PeerId, is_origin: bool) -> u32 {
    let (first, second) = if is_origin { (local, remote) } else { (remote, local) };
    let input = format!("{}:{},{}", channel_name, first, second);
    crc32fast::hash(input.as_bytes())
}
