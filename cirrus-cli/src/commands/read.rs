//! Read Command
//!
//! Streams a logical byte range of a file to stdout or a local file.

use super::{format_bytes, load_manifest};
use crate::symbols;
use anyhow::{Context, Result};
use cirrus_client::stream::READ_BUFFER_SIZE;
use cirrus_client::{CloudClient, ReadStream};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Read configuration
pub struct ReadConfig {
    pub manifest: PathBuf,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub output: Option<PathBuf>,
}

/// Run read command
pub async fn run(client: &CloudClient, config: ReadConfig) -> Result<()> {
    let file = load_manifest(&config.manifest)?;
    let mut stream = client
        .open_stream(&file, config.start, config.end)
        .await
        .with_context(|| format!("Failed to open {}", file.full_path()))?;

    let pb = ProgressBar::new(stream.len());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Reading {}", file.name()));

    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match &config.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Box::new(
                tokio::fs::File::create(path)
                    .await
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            )
        }
        None => {
            // Piped output: no progress bar
            pb.set_draw_target(ProgressDrawTarget::hidden());
            Box::new(tokio::io::stdout())
        }
    };

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .with_context(|| format!("Read of {} failed at byte {}", file.full_path(), stream.position()))?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        pb.inc(n as u64);
    }
    writer.flush().await?;
    pb.finish_and_clear();

    if let Some(path) = &config.output {
        println!(
            "{} Read {} ({}) to {}",
            style(symbols::CHECK).green(),
            style(file.full_path()).cyan(),
            format_bytes(total),
            path.display()
        );
    }

    Ok(())
}
