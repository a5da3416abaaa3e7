//! Console and JSONL logging for relay instances.
//!
//! Several relays can run side by side on one host (e.g. a bench setup with
//! one node per radio). Each writes its own JSONL file, so no two processes
//! ever append to the same file.
//!
//! ```text
//! logs/
//! └── raw/
//!     ├── 2026-10-18_node-a.jsonl
//!     └── 2026-10-18_node-b.jsonl
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use scanrelay_core::logging::LoggingBuilder;
//!
//! let log_path = LoggingBuilder::new("node-a")
//!     .with_logs_dir("./logs")
//!     .with_default_level("debug")
//!     .init()?;
//! ```
//!
//! ## Querying with jq
//!
//! ```bash
//! # Every aborted push
//! jq 'select(.msg == "Notify failed, aborting transfer")' logs/raw/*.jsonl
//!
//! # Envelope sizes per cycle
//! jq 'select(.msg == "Scan done") | .fields' logs/raw/*_node-a.jsonl
//! ```

pub mod entry;
pub mod layer;
pub mod writer;

pub use entry::JsonLogEntry;
pub use layer::{JsonlLayer, LoggingBuilder};
pub use writer::{read_all_entries, read_instance_entries, InstanceLogWriter};
