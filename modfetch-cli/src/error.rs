//! CLI error type and process exit codes.

use modfetch::config::ConfigError;
use modfetch::logging::LoggingError;
use modfetch::{DownloadError, ErrorKind};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Modlist not found: {0}")]
    ModlistNotFound(String),

    #[error("{0}")]
    Download(#[from] DownloadError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl CliError {
    /// Exit code for this error.
    ///
    /// ```text
    /// 1    runtime failure        10  transient network failure
    /// 2    configuration          11  throttled by the server
    /// 3    modlist not found      12  rejected or expired session
    /// 130  interrupted            13  filesystem permission
    ///                             14  integrity (hash, manifest)
    /// ```
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Runtime(_) => 1,
            CliError::Config(_) | CliError::Logging(_) => 2,
            CliError::ModlistNotFound(_) => 3,
            CliError::Download(e) => match e.kind() {
                ErrorKind::Transient => 10,
                ErrorKind::Throttled => 11,
                ErrorKind::Authorization => 12,
                ErrorKind::Permission => 13,
                ErrorKind::Integrity => 14,
                ErrorKind::Cancelled => 130,
            },
        }
    }

    /// A hint printed after the error message, when one applies.
    pub fn hint(&self) -> Option<&'static str> {
        let CliError::Download(e) = self else {
            return None;
        };
        match e.kind() {
            ErrorKind::Throttled => Some("The server is rate limiting requests; wait before trying again."),
            ErrorKind::Authorization => Some("Log in to Nexus Mods again and pass a fresh --cookie."),
            ErrorKind::Permission => Some("Check that the download directory is writable."),
            ErrorKind::Integrity => Some("Delete the affected file and run the command again."),
            _ => None,
        }
    }
}
