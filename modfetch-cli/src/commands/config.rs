//! Configuration CLI commands.
//!
//! Provides `config list` and `config path` for inspecting the settings the
//! download commands will use.

use std::path::Path;

use clap::Subcommand;
use modfetch::config::CONFIG_SECTION;
use modfetch::{format_size, DownloaderConfig};

use super::common::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// List the effective configuration
    List,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(config_path: Option<&Path>, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::List => {
            let config = load_config(config_path)?;
            for (key, value) in settings(&config) {
                println!("{:<26} {}", key, value);
            }
            Ok(())
        }
        ConfigCommands::Path => {
            match config_path
                .map(Path::to_path_buf)
                .or_else(DownloaderConfig::default_path)
            {
                Some(path) => {
                    let state = if path.exists() { "" } else { " (not created)" };
                    println!("{}{}", path.display(), state);
                    println!("Settings are read from the [{}] section.", CONFIG_SECTION);
                }
                None => println!("(no configuration directory on this platform)"),
            }
            Ok(())
        }
    }
}

/// Effective settings as display rows.
fn settings(config: &DownloaderConfig) -> Vec<(&'static str, String)> {
    vec![
        ("max_concurrent_downloads", config.max_concurrent_downloads.to_string()),
        ("max_file_size", format_size(config.max_file_size)),
        ("max_retries", config.max_retries.to_string()),
        ("retry_delay_ms", config.retry_delay.as_millis().to_string()),
        ("retry_multiplier", config.retry_multiplier.to_string()),
        ("retry_jitter_ms", config.retry_jitter.as_millis().to_string()),
        ("stall_timeout_secs", config.stall_timeout.as_secs().to_string()),
        ("http_timeout_secs", config.http_timeout.as_secs().to_string()),
        ("resolve_timeout_secs", config.resolve_timeout.as_secs().to_string()),
        ("buffer_size", format_size(config.buffer_size as u64)),
        ("check_hash", config.check_hash.to_string()),
        ("discover_existing_files", config.discover_existing_files.to_string()),
        ("accepted_extensions", config.accepted_extensions.join(",")),
        ("download_dir", config.download_dir.display().to_string()),
        ("modlist_dir", config.modlist_dir.display().to_string()),
        ("force_ipv4", config.force_ipv4.to_string()),
    ]
}
