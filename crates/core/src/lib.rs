//! Core types and shared functionality for pixmirror.
//!
//! This crate provides:
//! - The SQLite-backed cache ledger and its claim/backoff primitives
//! - Salted cache key derivation and the secret-salt bootstrap
//! - Artifact naming conventions
//! - Unified error types
//! - Configuration structures

pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;

pub use artifact::{ARTIFACT_PREFIX, ArtifactKind, artifact_path};
pub use cache::{CacheDb, CacheEntry, CacheStatus, SeedOutcome};
pub use config::AppConfig;
pub use error::Error;
