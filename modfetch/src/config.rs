//! Downloader configuration.
//!
//! Defaults are tuned for the Nexus Mods API and the Wabbajack CDN. Values
//! can be overridden programmatically with the `with_*` builders or loaded
//! from the `[download]` section of an INI file:
//!
//! ```text
//! [download]
//! max_concurrent_downloads = 3
//! max_file_size_mib = 2000
//! max_retries = 3
//! retry_delay_ms = 500
//! retry_multiplier = 2
//! retry_jitter_ms = 1000
//! stall_timeout_secs = 30
//! http_timeout_secs = 30
//! resolve_timeout_secs = 30
//! buffer_size_kib = 512
//! check_hash = true
//! discover_existing_files = true
//! accepted_extensions = .zip, .rar, .7z
//! download_dir = downloads
//! modlist_dir = downloaded-modlists
//! force_ipv4 = true
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::retry::RetryPolicy;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Name of the INI section holding downloader settings.
pub const CONFIG_SECTION: &str = "download";

/// File name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "modfetch.ini";

/// Longest pause between two chunks of a response body.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("invalid value {value:?} for '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Settings for both downloaders.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloaderConfig {
    /// Maximum number of artifacts (or parts) transferred at once.
    pub max_concurrent_downloads: usize,

    /// Artifacts declared larger than this (bytes) are skipped.
    pub max_file_size: u64,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub retry_delay: Duration,

    /// Backoff multiplier between retries.
    pub retry_multiplier: u32,

    /// Upper bound of the random jitter added to each retry delay.
    pub retry_jitter: Duration,

    /// A body read that receives nothing for this long is a stall.
    pub stall_timeout: Duration,

    /// Timeout for a request to produce response headers.
    pub http_timeout: Duration,

    /// Timeout for resolving one download link.
    pub resolve_timeout: Duration,

    /// Copy buffer size in bytes.
    pub buffer_size: usize,

    /// Verify the hash of every downloaded artifact.
    pub check_hash: bool,

    /// Skip artifacts already present in the download directory.
    pub discover_existing_files: bool,

    /// Extensions considered when scanning for existing artifacts.
    pub accepted_extensions: Vec<String>,

    /// Where mod archives are written.
    pub download_dir: PathBuf,

    /// Where modlist archives are written.
    pub modlist_dir: PathBuf,

    /// Connect to the CDN over IPv4 only.
    pub force_ipv4: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_file_size: 2000 * MIB,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            retry_multiplier: 2,
            retry_jitter: Duration::from_millis(1000),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            http_timeout: Duration::from_secs(30),
            resolve_timeout: Duration::from_secs(30),
            buffer_size: (512 * KIB) as usize,
            check_hash: true,
            discover_existing_files: true,
            accepted_extensions: vec![".zip".into(), ".rar".into(), ".7z".into()],
            download_dir: PathBuf::from("downloads"),
            modlist_dir: PathBuf::from("downloaded-modlists"),
            force_ipv4: true,
        }
    }
}

impl DownloaderConfig {
    /// Create a configuration writing archives to `download_dir`.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of concurrent transfers (at least 1).
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max.max(1);
        self
    }

    /// Set the maximum artifact size in bytes.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set base delay, multiplier and jitter of the retry backoff.
    pub fn with_backoff(mut self, delay: Duration, multiplier: u32, jitter: Duration) -> Self {
        self.retry_delay = delay;
        self.retry_multiplier = multiplier.max(1);
        self.retry_jitter = jitter;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }

    pub fn with_check_hash(mut self, check: bool) -> Self {
        self.check_hash = check;
        self
    }

    pub fn with_discover_existing_files(mut self, discover: bool) -> Self {
        self.discover_existing_files = discover;
        self
    }

    pub fn with_accepted_extensions(mut self, extensions: Vec<String>) -> Self {
        self.accepted_extensions = extensions;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_modlist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.modlist_dir = dir.into();
        self
    }

    pub fn with_force_ipv4(mut self, force: bool) -> Self {
        self.force_ipv4 = force;
        self
    }

    /// Retry policy derived from the backoff settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_delay,
            self.retry_multiplier,
            self.retry_jitter,
        )
    }

    /// Default location of the configuration file (`~/.config/modfetch/modfetch.ini`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("modfetch").join(CONFIG_FILE_NAME))
    }

    /// Load from an INI file, falling back to defaults for absent keys.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::from_ini(&ini)?;
        tracing::debug!(path = %path.display(), "Loaded downloader configuration");
        Ok(config)
    }

    /// Parse INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(CONFIG_SECTION)) else {
            return Ok(config);
        };

        if let Some(v) = parse::<usize>(section, "max_concurrent_downloads")? {
            config = config.with_max_concurrent_downloads(v);
        }
        if let Some(v) = parse::<u64>(section, "max_file_size_mib")? {
            config.max_file_size = v.saturating_mul(MIB);
        }
        if let Some(v) = parse::<u32>(section, "max_retries")? {
            config.max_retries = v;
        }
        if let Some(v) = parse::<u64>(section, "retry_delay_ms")? {
            config.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u32>(section, "retry_multiplier")? {
            config.retry_multiplier = v.max(1);
        }
        if let Some(v) = parse::<u64>(section, "retry_jitter_ms")? {
            config.retry_jitter = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u64>(section, "stall_timeout_secs")? {
            config.stall_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64>(section, "http_timeout_secs")? {
            config.http_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64>(section, "resolve_timeout_secs")? {
            config.resolve_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64>(section, "buffer_size_kib")? {
            config = config.with_buffer_size(v.saturating_mul(KIB) as usize);
        }
        if let Some(v) = parse_bool(section, "check_hash")? {
            config.check_hash = v;
        }
        if let Some(v) = parse_bool(section, "discover_existing_files")? {
            config.discover_existing_files = v;
        }
        if let Some(v) = section.get("accepted_extensions") {
            config.accepted_extensions = v
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = section.get("download_dir") {
            config.download_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = section.get("modlist_dir") {
            config.modlist_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = parse_bool(section, "force_ipv4")? {
            config.force_ipv4 = v;
        }

        Ok(config)
    }
}

fn parse<T>(section: &Properties, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    section
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
        })
        .transpose()
}

fn parse_bool(section: &Properties, key: &str) -> Result<Option<bool>, ConfigError> {
    section
        .get(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: "expected true or false".to_string(),
            }),
        })
        .transpose()
}

/// Human-readable size using 1024-based units (`B`, `KB`, `MB`, ... `PB`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < KIB {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DownloaderConfig::default();
        assert_eq!(config.max_concurrent_downloads, 3);
        assert_eq!(config.max_file_size, 2000 * 1024 * 1024);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.buffer_size, 512 * 1024);
        assert!(config.check_hash);
        assert!(config.discover_existing_files);
        assert!(config.force_ipv4);
        assert_eq!(config.modlist_dir, PathBuf::from("downloaded-modlists"));
        assert_eq!(config.accepted_extensions, vec![".zip", ".rar", ".7z"]);
    }

    #[test]
    fn test_builder_pattern() {
        let config = DownloaderConfig::new("/mods")
            .with_max_concurrent_downloads(0)
            .with_max_retries(5)
            .with_backoff(Duration::from_millis(10), 3, Duration::ZERO)
            .with_check_hash(false)
            .with_force_ipv4(false);

        assert_eq!(config.download_dir, PathBuf::from("/mods"));
        assert_eq!(config.max_concurrent_downloads, 1);
        assert!(!config.check_hash);
        assert!(!config.force_ipv4);

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.multiplier, 3);
        assert_eq!(policy.jitter, Duration::ZERO);
    }

    #[test]
    fn test_from_ini_overrides_defaults() {
        let config = DownloaderConfig::from_ini_str(
            "[download]\n\
             max_concurrent_downloads = 6\n\
             max_file_size_mib = 10\n\
             retry_delay_ms = 250\n\
             stall_timeout_secs = 5\n\
             buffer_size_kib = 64\n\
             check_hash = no\n\
             accepted_extensions = .7z, .zip\n\
             download_dir = /data/mods\n",
        )
        .unwrap();

        assert_eq!(config.max_concurrent_downloads, 6);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.stall_timeout, Duration::from_secs(5));
        assert_eq!(config.buffer_size, 64 * 1024);
        assert!(!config.check_hash);
        assert_eq!(config.accepted_extensions, vec![".7z", ".zip"]);
        assert_eq!(config.download_dir, PathBuf::from("/data/mods"));
        // Untouched keys keep defaults.
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_from_ini_without_section() {
        let config = DownloaderConfig::from_ini_str("[other]\nkey = value\n").unwrap();
        assert_eq!(config, DownloaderConfig::default());
    }

    #[test]
    fn test_from_ini_rejects_bad_value() {
        let err = DownloaderConfig::from_ini_str("[download]\nmax_retries = many\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "max_retries"));

        let err = DownloaderConfig::from_ini_str("[download]\ncheck_hash = maybe\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[download]\nmax_retries = 7\n").unwrap();

        let config = DownloaderConfig::load(&path).unwrap();
        assert_eq!(config.max_retries, 7);

        let missing = DownloaderConfig::load(&temp.path().join("absent.ini"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
