//! Info Command
//!
//! Shows how a logical file is laid out in storage and where it is published.

use super::{format_bytes, load_manifest};
use crate::symbols;
use anyhow::{Context, Result};
use cirrus_client::CloudClient;
use console::style;
use std::path::PathBuf;

/// Default prefix for public links
pub const DEFAULT_LINK_BASE: &str = "https://cloud.mail.ru/public/";

/// Info configuration
pub struct InfoConfig {
    pub manifest: PathBuf,
    pub link_base: String,
    pub video: bool,
}

/// Run info command
pub async fn run(client: &CloudClient, config: InfoConfig) -> Result<()> {
    let file = load_manifest(&config.manifest)?;

    println!();
    println!("{}", style(file.full_path()).bold());
    println!("{}", symbols::rule(12));
    println!("  {:<12} {}", style("Size:").dim(), format_bytes(file.size()));
    if file.is_encrypted() {
        println!(
            "  {:<12} {} ({} stored)",
            style("Encrypted:").dim(),
            symbols::LOCK,
            format_bytes(file.physical_size())
        );
    }
    if !file.hash().is_empty() {
        println!("  {:<12} {}", style("Hash:").dim(), file.hash());
    }

    if file.is_split() {
        println!();
        println!("{}", style("Parts").bold());
        println!("{}", symbols::rule(7));
        for part in file.parts() {
            println!("  {}  {}", part.path, style(format_bytes(part.size)).dim());
        }
    }

    let published = file.publish_info(&config.link_base);
    if !published.is_empty() {
        println!();
        println!("{}", style("Public links").bold());
        println!("{}", symbols::rule(7));
        for item in &published {
            println!("  {} {}  {}", symbols::LINK, item.path, style(&item.url).cyan());
        }
    }

    if config.video {
        println!();
        match client
            .video_url(&file)
            .await
            .context("Failed to resolve video shard")?
        {
            Some(url) => println!("{} {}", style("Stream:").dim(), style(url).cyan()),
            None => println!(
                "{} {} is not published",
                style(symbols::WARN).yellow(),
                file.full_path()
            ),
        }
    }

    Ok(())
}
