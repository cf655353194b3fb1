//! Database layer for deskpulse
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - The append-only session log
//! - Durable key/value state (credential, sync cursor, policies)

pub mod repo;
pub mod schema;
pub mod state;

pub use repo::Database;
