//! Shard Command
//!
//! Shows which endpoint the client would use for an operation class.

use crate::symbols;
use anyhow::Result;
use cirrus_client::{CloudClient, ShardClass};
use console::style;

/// Run shard command
pub async fn run(client: &CloudClient, class: Option<ShardClass>) -> Result<()> {
    let classes = match class {
        Some(class) => vec![class],
        None => ShardClass::ALL.to_vec(),
    };

    println!();
    println!("{}", style("Shard endpoints").bold());
    println!("{}", symbols::rule(12));

    for class in classes {
        match client.shard_info(class).await {
            Ok(url) => println!(
                "  {} {:<14} {}",
                style(symbols::CHECK).green(),
                class.to_string(),
                style(url).cyan()
            ),
            Err(e) => println!(
                "  {} {:<14} {}",
                style(symbols::CROSS).red(),
                class.to_string(),
                style(e).red()
            ),
        }
    }

    let banned = client.shards().bans().banned();
    if !banned.is_empty() {
        println!();
        println!("{} Banned endpoints:", style(symbols::WARN).yellow());
        for url in banned {
            println!("  {}", url);
        }
    }

    Ok(())
}
