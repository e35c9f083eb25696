//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use modfetch::{DownloaderConfig, ReqwestTransport};
use tokio_util::sync::CancellationToken;

use crate::error::CliError;

/// Download settings that override the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct DownloadArgs {
    /// Directory for mod archives
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Directory for modlist files
    #[arg(long)]
    pub modlist_dir: Option<PathBuf>,

    /// Maximum number of concurrent downloads
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Retries per file after the first attempt
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds without data before a transfer is considered stalled
    #[arg(long)]
    pub stall_timeout: Option<u64>,

    /// Skip hash verification of downloaded files
    #[arg(long)]
    pub no_hash_check: bool,

    /// Download files even when they already exist
    #[arg(long)]
    pub no_discover: bool,

    /// Allow IPv6 connections to the CDN
    #[arg(long)]
    pub allow_ipv6: bool,
}

impl DownloadArgs {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, mut config: DownloaderConfig) -> DownloaderConfig {
        if let Some(dir) = &self.download_dir {
            config = config.with_download_dir(dir);
        }
        if let Some(dir) = &self.modlist_dir {
            config = config.with_modlist_dir(dir);
        }
        if let Some(n) = self.concurrency {
            config = config.with_max_concurrent_downloads(n);
        }
        if let Some(n) = self.max_retries {
            config = config.with_max_retries(n);
        }
        if let Some(secs) = self.stall_timeout {
            config = config.with_stall_timeout(Duration::from_secs(secs));
        }
        if self.no_hash_check {
            config = config.with_check_hash(false);
        }
        if self.no_discover {
            config = config.with_discover_existing_files(false);
        }
        if self.allow_ipv6 {
            config = config.with_force_ipv4(false);
        }
        config
    }
}

/// Load configuration: explicit path > default path (if present) > defaults.
pub fn load_config(path: Option<&Path>) -> Result<DownloaderConfig, CliError> {
    match path {
        Some(path) => Ok(DownloaderConfig::load(path)?),
        None => match DownloaderConfig::default_path() {
            Some(default) if default.exists() => Ok(DownloaderConfig::load(&default)?),
            _ => Ok(DownloaderConfig::default()),
        },
    }
}

/// Build the multi-threaded runtime the commands run on.
pub fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::Runtime(format!("Failed to start async runtime: {}", e)))
}

/// A cancellation token fired by Ctrl+C.
pub fn shutdown_token() -> Result<CancellationToken, CliError> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, stopping downloads...");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
    Ok(token)
}

pub fn transport(config: &DownloaderConfig) -> Result<Arc<ReqwestTransport>, CliError> {
    Ok(Arc::new(ReqwestTransport::new(config)?))
}

/// Byte progress bar style.
pub fn bytes_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec} - {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━━╌")
}

/// Item count progress bar style.
pub fn count_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━━╌")
}

/// A byte progress bar of `total` bytes, or a spinner when unknown.
pub fn bytes_bar(total: Option<u64>) -> ProgressBar {
    let bar = match total {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    bar.set_style(bytes_style());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}
