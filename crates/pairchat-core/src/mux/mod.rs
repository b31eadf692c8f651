//! Channel multiplexing over a single peer transport
//!
//! Several logical byte streams (log replication for both directions, the
//! address lighthouse) share one physical connection. Each frame on the wire
//! is a [`ChannelEnvelope`] tagged with a [`ChannelKind`] and a 32-bit channel
//! index.
//!
//! ```text
//!  replicate() ──► wrap(tag) ──┐                      ┌──► unwrap(tag) ──► replicate()
//!  lighthouse  ──► wrap(tag) ──┼──► PeerConnection ───┤
//!                              │      (FrameBus)      └──► unwrap(tag) ──► key exchange
//! ```
//!
//! Unwrap stages never fail: frames that do not decode or carry another tag
//! are dropped.

mod envelope;
mod pipeline;

pub use envelope::{channel_index, ChannelEnvelope, ChannelKind, ChannelTag};
pub use pipeline::{spawn_unwrap, spawn_wrap, unwrap_frame, wrap_chunk, FrameBus, STAGE_CAPACITY};
