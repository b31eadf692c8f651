//! Merged, timestamp-ordered view over both logs of a conversation
//!
//! Each registered log gets a [`Cursor`] marking the window of entries that
//! is already visible:
//!
//! ```text
//!   log:      0 ... start ........ end ... len
//!                   └── visible ──┘
//!   update_tail: extends start downwards (older messages, prepended)
//!   update_head: extends end upwards (newer messages, appended)
//! ```

mod merger;

pub use merger::{Cursor, FeedId, MessageView, ViewEvent, ViewMessage};
