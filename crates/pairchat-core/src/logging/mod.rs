//! Per-node JSONL trace files
//!
//! Two nodes running side by side (for example the two parties of the demo)
//! each append to their own file:
//!
//! ```text
//! <log_dir>/
//! ├── 2026-10-18_creator.jsonl
//! └── 2026-10-18_joiner.jsonl
//! ```
//!
//! Each line is one [`TraceEntry`], so the files can be merged with `jq`:
//!
//! ```bash
//! cat logs/*.jsonl | jq -s 'sort_by(.ts)'
//! jq 'select(.level == "warn")' logs/*_joiner.jsonl
//! ```

mod entry;
mod layer;
mod writer;

pub use entry::TraceEntry;
pub use layer::{env_filter, JsonlLayer};
pub use writer::{read_entries, NodeLogWriter};
