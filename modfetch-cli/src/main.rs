//! modfetch CLI - Command-line interface
//!
//! Lists published Wabbajack modlists, downloads modlist files from the
//! modlist CDN and downloads the Nexus Mods archives a modlist needs.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use modfetch::logging::{default_log_path, init_logging};
use modfetch::modlist::REPOSITORIES_URL;

use commands::catalog::CatalogArgs;
use commands::common::DownloadArgs;
use commands::config::ConfigCommands;
use commands::modlist::ModlistArgs;
use commands::mods::ModsArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "modfetch", version, about)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options accepted by every command.
#[derive(Debug, Clone, clap::Args)]
pub struct GlobalArgs {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level or filter directive, e.g. `debug` or `modfetch=trace`
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Write logs to the default log file location
    #[arg(long, global = true, conflicts_with = "log_file")]
    pub log: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List published modlists
    Catalog {
        /// Only show modlists for this game
        #[arg(long)]
        game: Option<String>,

        /// Include modlists marked NSFW
        #[arg(long)]
        nsfw: bool,

        /// Repository index URL
        #[arg(long, default_value = REPOSITORIES_URL)]
        repositories: String,
    },

    /// Download a modlist file
    Modlist {
        /// Modlist title (exact or unique partial match)
        #[arg(required_unless_present = "link")]
        title: Option<String>,

        /// Download link of the modlist instead of a catalog title
        #[arg(long, conflicts_with = "title")]
        link: Option<String>,

        /// Expected base64 hash of the modlist when using --link
        #[arg(long, requires = "link", conflicts_with = "title")]
        hash: Option<String>,

        /// Repository index URL
        #[arg(long, default_value = REPOSITORIES_URL)]
        repositories: String,

        #[command(flatten)]
        download: DownloadArgs,
    },

    /// Download the Nexus Mods archives of a modlist file
    Mods {
        /// Path to a .wabbajack file
        modlist: PathBuf,

        /// Cookie header of a logged-in nexusmods.com session
        #[arg(long, env = "MODFETCH_NEXUS_COOKIE", hide_env_values = true)]
        cookie: Option<String>,

        /// Read the session cookie from a file
        #[arg(long, conflicts_with = "cookie")]
        cookie_file: Option<PathBuf>,

        /// Index of the first download, to continue an earlier session
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Ask the server for the file name and size before downloading
        #[arg(long)]
        head: bool,

        /// Print the downloads and their mod pages without downloading
        #[arg(long)]
        list: bool,

        #[command(flatten)]
        download: DownloadArgs,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_file = match (&cli.global.log_file, cli.global.log) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => default_log_path(),
        (None, false) => None,
    };
    let _guard = match init_logging(cli.global.log_level.as_deref(), log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => return fail(CliError::from(e)),
    };
    tracing::debug!(version = modfetch::VERSION, "modfetch starting");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let global = cli.global;
    match cli.command {
        Commands::Catalog {
            game,
            nsfw,
            repositories,
        } => commands::catalog::run(
            &global,
            CatalogArgs {
                repositories,
                game,
                include_nsfw: nsfw,
            },
        ),
        Commands::Modlist {
            title,
            link,
            hash,
            repositories,
            download,
        } => commands::modlist::run(
            &global,
            ModlistArgs {
                title,
                link,
                hash,
                repositories,
                download,
            },
        ),
        Commands::Mods {
            modlist,
            cookie,
            cookie_file,
            start,
            head,
            list,
            download,
        } => commands::mods::run(
            &global,
            ModsArgs {
                modlist,
                cookie,
                cookie_file,
                start,
                head_probe: head,
                list_only: list,
                download,
            },
        ),
        Commands::Config { command } => commands::config::run(global.config.as_deref(), command),
    }
}

fn fail(err: CliError) -> ExitCode {
    if matches!(&err, CliError::Download(e) if e.is_cancelled()) {
        eprintln!("Interrupted.");
    } else {
        eprintln!("Error: {}", err);
        if let Some(hint) = err.hint() {
            eprintln!("Hint: {}", hint);
        }
    }
    ExitCode::from(err.exit_code().clamp(0, 255) as u8)
}
