//! SQLite-backed cache ledger for remote image artifacts.
//!
//! This module provides the persistent table behind the caching proxy, with
//! async access via tokio-rusqlite. It supports:
//!
//! - Salted key derivation from source URLs
//! - Once-only secret-salt bootstrap
//! - Insert-if-absent seeding with backdated retry eligibility
//! - Compare-and-increment claim arbitration for retries
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod connection;
pub mod entries;
pub mod key;
pub mod migrations;
pub mod salt;

pub use crate::Error;

pub use connection::CacheDb;
pub use entries::{CacheEntry, CacheStatus, EntryState, SeedOutcome};
