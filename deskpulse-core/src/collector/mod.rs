//! Activity collector sync
//!
//! Ships the local session log to the remote activity collector.
//!
//! ## Architecture
//!
//! The collector follows a "local-first" principle:
//! - Sessions are always written to the local SQLite log first
//! - Uploading happens on a separate task, batch by batch
//! - The sync cursor only moves after the collector acknowledged a batch
//! - Network failures never block event capture
//!
//! ## Configuration
//!
//! ```toml
//! [api]
//! base_url = "https://www.timecamp.com/third_party/api"
//! service = "timecamp-desktop"
//!
//! [sync]
//! interval_secs = 30
//! ```

mod account;
mod client;
mod engine;
mod payload;

pub use account::{AccountReport, AccountSync};
pub use client::{parse_account, parse_policies, ActivityClient, CollectorApi, POLICY_KEYS};
pub use engine::{SyncEngine, SyncStats, TickOutcome, TickReport};
pub use payload::{UploadForm, EMPTY_APP_PLACEHOLDER, HIDDEN_ACTIVITY_NAME};
