//! # deskpulse-core
//!
//! Core library for deskpulse - a desktop activity tracker that ships focus
//! sessions to a remote activity collector.
//!
//! This library provides:
//! - Domain types for raw focus events and sessions
//! - The session builder and a recorder that never drops a finalized session
//! - Database storage layer with SQLite (session log and durable state)
//! - Cursor-based, at-least-once upload to the collector
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Capture:** raw focus events are coalesced into sessions
//! - **Log:** finalized sessions are appended to the local SQLite log
//! - **Sync:** sessions past the sync cursor are uploaded in batches; the
//!   cursor advances only after the collector acknowledged a batch
//!
//! ## Example
//!
//! ```rust,no_run
//! use deskpulse_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use collector::{ActivityClient, CollectorApi, SyncEngine, TickOutcome, TickReport};
pub use config::Config;
pub use credential::CredentialGate;
pub use db::Database;
pub use error::{Error, Result, StoreError};
pub use tracker::{SessionBuilder, SessionRecorder};
pub use types::*;

// Public modules
pub mod collector;
pub mod config;
pub mod credential;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod service;
pub mod tracker;
pub mod types;
