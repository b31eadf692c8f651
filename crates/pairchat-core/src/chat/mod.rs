//! Conversation layer: the stored message record and the session that ties
//! discovery, synchronization and the merged view together.

mod message;
mod session;

pub use message::{UserMessage, LOCAL_SENDER, MESSAGE_NONCE_LEN, PADDED_LEN};
pub use session::{ChatEvent, ChatSession, Participant};
