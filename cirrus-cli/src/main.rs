//! Cirrus CLI
//!
//! Command-line front end for reading files out of a sharded cloud store.
//!
//! # Commands
//! - `read` - Stream a byte range of a file to stdout or a local file
//! - `info` - Show the layout and public links of a file
//! - `shard` - Show the endpoint selected for an operation class
//! - `config` - Show or edit configuration
//!
//! Files are described by JSON manifests (path, part sizes, optional public
//! links and encryption padding), as returned by a metadata lookup.
//!
//! # Configuration
//! Config file: ~/.cirrus/config.toml

use anyhow::{Context, Result};
use cirrus_client::{ClientConfig, CloudClient, HttpTransport, ShardClass, StaticToken};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod symbols;

use commands::{info, read, shard};

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(about = "Read files from a sharded cloud store")]
#[command(version)]
struct Cli {
    /// Dispatcher URL (overrides config file)
    #[arg(long, global = true)]
    dispatcher: Option<String>,

    /// Download access token
    #[arg(long, global = true, env = "CIRRUS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Password of encrypted files
    #[arg(long, global = true, env = "CIRRUS_CRYPT_PASSWORD", hide_env_values = true)]
    crypt_password: Option<String>,

    /// Client id sent with every download (overrides config file)
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a byte range of a file
    Read {
        /// Path to the file's JSON manifest
        manifest: PathBuf,

        /// First logical byte (inclusive)
        #[arg(long)]
        start: Option<u64>,

        /// Last logical byte (exclusive)
        #[arg(long)]
        end: Option<u64>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show file layout and public links
    Info {
        /// Path to the file's JSON manifest
        manifest: PathBuf,

        /// Base URL prepended to public links
        #[arg(long, default_value = info::DEFAULT_LINK_BASE)]
        link_base: String,

        /// Also resolve the video streaming link
        #[arg(long)]
        video: bool,
    },

    /// Show the endpoint selected for an operation class
    Shard {
        /// Operation class (get, weblink_get, upload, metadata, weblink_video); all if omitted
        class: Option<ShardClass>,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., cloud.dispatcher_url, download.retry_attempts)
        key: String,
        /// Value to set
        value: String,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cirrus=info"));

    // Logs go to stderr so `read` can stream data to stdout
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let overrides = Overrides {
        dispatcher: cli.dispatcher,
        client_id: cli.client_id,
        token: cli.token,
        crypt_password: cli.crypt_password,
    };

    match cli.command {
        Commands::Read {
            manifest,
            start,
            end,
            output,
        } => {
            let client = connect(overrides)?;
            let config = read::ReadConfig {
                manifest,
                start,
                end,
                output,
            };
            read::run(&client, config).await?;
        }

        Commands::Info {
            manifest,
            link_base,
            video,
        } => {
            let client = connect(overrides)?;
            let config = info::InfoConfig {
                manifest,
                link_base,
                video,
            };
            info::run(&client, config).await?;
        }

        Commands::Shard { class } => {
            let client = connect(overrides)?;
            shard::run(&client, class).await?;
        }

        Commands::Config { command } => {
            handle_config_command(command)?;
        }
    }

    Ok(())
}

/// Global flags that take precedence over the config file
struct Overrides {
    dispatcher: Option<String>,
    client_id: Option<String>,
    token: Option<String>,
    crypt_password: Option<String>,
}

/// Build a client from ~/.cirrus/config.toml and command-line overrides
fn connect(overrides: Overrides) -> Result<CloudClient> {
    let cfg = config::load_config();

    let mut client_config: ClientConfig = cfg.client_config();
    if let Some(dispatcher) = overrides.dispatcher {
        client_config.dispatcher_url = dispatcher;
    }
    if let Some(client_id) = overrides.client_id {
        client_config.client_id = client_id;
    }
    let token = overrides.token.or(cfg.auth.token).unwrap_or_default();
    let crypt_password = overrides.crypt_password.or(cfg.auth.crypt_password);

    let transport =
        Arc::new(HttpTransport::new(&client_config).context("Failed to build HTTP client")?);
    let tokens = Arc::new(StaticToken::new(token));

    let client = CloudClient::new(client_config, transport.clone(), tokens, transport);
    Ok(match crypt_password {
        Some(password) => client.with_crypt_password(password),
        None => client,
    })
}

/// Handle config subcommands
fn handle_config_command(command: Option<ConfigCommands>) -> Result<()> {
    use console::style;

    match command {
        None | Some(ConfigCommands::Show) => {
            let cfg = config::load_config();
            println!();
            println!("{}", style("Cirrus Configuration").bold().underlined());
            println!();
            println!("{}", style("[cloud]").cyan());
            println!("  dispatcher_url = \"{}\"", cfg.cloud.dispatcher_url);
            println!("  client_id = \"{}\"", cfg.cloud.client_id);
            println!();
            println!("{}", style("[auth]").cyan());
            println!("  token = {}", redacted(cfg.auth.token.is_some()));
            println!("  crypt_password = {}", redacted(cfg.auth.crypt_password.is_some()));
            println!();
            println!("{}", style("[download]").cyan());
            println!("  retry_attempts = {}", cfg.download.retry_attempts);
            println!("  retry_delay_ms = {}", cfg.download.retry_delay_ms);
            println!("  timeout_secs = {}", cfg.download.timeout_secs);
            println!();

            if let Ok(path) = config::config_file_path() {
                println!("{} {}", style("Config file:").dim(), path.display());
                if !path.exists() {
                    println!(
                        "{} Run '{}' to create it",
                        style("(not created yet)").yellow(),
                        style("cirrus config init").green()
                    );
                }
            }
        }

        Some(ConfigCommands::Path) => {
            if let Ok(path) = config::config_file_path() {
                println!("{}", path.display());
            }
        }

        Some(ConfigCommands::Init { force }) => {
            let path = config::config_file_path()?;
            if path.exists() && !force {
                println!(
                    "{} Config file already exists at {}",
                    style(symbols::WARN).yellow(),
                    path.display()
                );
                println!("Use --force to overwrite");
                return Ok(());
            }

            config::save_config(&config::CirrusConfig::default())?;
            println!(
                "{} Config file created at {}",
                style(symbols::CHECK).green(),
                path.display()
            );
        }

        Some(ConfigCommands::Set { key, value }) => {
            let mut cfg = config::load_config();
            cfg.set(&key, value)?;
            config::save_config(&cfg)?;
            println!("{} Set {}", style(symbols::CHECK).green(), style(&key).cyan());
        }
    }

    Ok(())
}

fn redacted(present: bool) -> &'static str {
    if present {
        "\"********\""
    } else {
        "(not set)"
    }
}
