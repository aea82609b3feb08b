//! Cirrus Core Library
//!
//! Core abstractions for reading files out of a sharded cloud object store.
//! This crate provides:
//! - The logical file model (multi-part layout, crypto metadata)
//! - AES-256 XTS sector cipher with Argon2 key derivation
//! - Bounded fixed-delay retry and a TTL value cache
//! - Common types and error handling

pub mod cache;
pub mod crypto;
pub mod error;
pub mod file;
pub mod path;
pub mod retry;

pub use cache::Cached;
pub use crypto::{CryptoPublicInfo, EncryptionKey, XtsCipher};
pub use error::{CirrusError, Result};
pub use file::{CryptoInfo, FileManifest, LogicalFile, PhysicalPart};
pub use retry::{retry, RetryPolicy};

/// Sector and block constants
pub use crypto::{BLOCK_SIZE, SECTOR_SIZE};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
