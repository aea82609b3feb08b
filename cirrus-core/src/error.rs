//! Error types for Cirrus
//!
//! Provides a unified error type for all Cirrus operations.

use thiserror::Error;

/// Result type alias for Cirrus operations
pub type Result<T> = std::result::Result<T, CirrusError>;

/// Unified error type for Cirrus
#[derive(Error, Debug)]
pub enum CirrusError {
    // ===== Remote Object Errors =====
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid range: {start}..{end} (length: {len})")]
    InvalidRange { start: u64, end: u64, len: u64 },

    #[error("Unexpected end of body: expected {expected} bytes, got {actual}")]
    UnexpectedEof { expected: u64, actual: u64 },

    // ===== Network Errors =====
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status} from {url}")]
    Server { status: u16, url: String },

    #[error("No shards available for {0}")]
    NoShardsAvailable(String),

    // ===== Cryptography Errors =====
    #[error("Invalid crypto header: {0}")]
    CryptoHeader(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CirrusError {
    /// Terminal condition: the object does not exist, retrying cannot help
    pub fn is_not_found(&self) -> bool {
        matches!(self, CirrusError::NotFound(_))
    }

    /// Failure attributable to the endpoint itself rather than the network path
    pub fn is_server_fault(&self) -> bool {
        matches!(self, CirrusError::Server { status, .. } if *status >= 500)
    }
}

impl From<serde_json::Error> for CirrusError {
    fn from(err: serde_json::Error) -> Self {
        CirrusError::Serialization(err.to_string())
    }
}
