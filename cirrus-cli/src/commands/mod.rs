//! CLI Commands

pub mod info;
pub mod read;
pub mod shard;

use anyhow::{Context, Result};
use cirrus_core::{FileManifest, LogicalFile};
use std::path::Path;

/// Load a logical file from its JSON manifest
pub fn load_manifest(path: &Path) -> Result<LogicalFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let manifest: FileManifest =
        serde_json::from_str(&content).context("Failed to parse manifest")?;
    LogicalFile::try_from(manifest).context("Invalid manifest")
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
