//! Modlist command - download a `.wabbajack` file from the modlist CDN.

use std::sync::Arc;

use modfetch::modlist::{fetch_catalog, FetchOutcome, FetchPhase, ModListMetadata};
use modfetch::{format_size, HashValue, SegmentedArchiveFetcher};

use super::common::{bytes_bar, load_config, runtime, shutdown_token, transport, DownloadArgs};
use crate::error::CliError;
use crate::GlobalArgs;

/// Arguments for the modlist command.
pub struct ModlistArgs {
    /// Title of a modlist in the catalog.
    pub title: Option<String>,
    /// Download link of the archive, bypassing the catalog.
    pub link: Option<String>,
    /// Expected hash for `link`, base64.
    pub hash: Option<String>,
    pub repositories: String,
    pub download: DownloadArgs,
}

/// Run the modlist command.
pub fn run(global: &GlobalArgs, args: ModlistArgs) -> Result<(), CliError> {
    check_args(&args)?;
    let config = args.download.apply(load_config(global.config.as_deref())?);
    let transport = transport(&config)?;
    let cancel = shutdown_token()?;
    let runtime = runtime()?;

    let (link, hash, size) = match (&args.link, &args.title) {
        (Some(link), _) => {
            let hash = match &args.hash {
                Some(text) => Some(
                    HashValue::from_base64(text)
                        .map_err(|e| CliError::Config(format!("Invalid --hash: {}", e)))?,
                ),
                None => None,
            };
            (link.clone(), hash, None)
        }
        (None, Some(title)) => {
            let lists = runtime.block_on(fetch_catalog(
                transport.as_ref(),
                &args.repositories,
                config.max_concurrent_downloads,
                config.stall_timeout,
                &cancel,
            ))?;
            let list = find_modlist(&lists, title)?;
            let size = list.download_metadata.as_ref().map(|m| m.size);
            (list.links.download.clone(), list.hash(), size)
        }
        (None, None) => {
            return Err(CliError::Config(
                "Either a modlist title or --link is required".to_string(),
            ))
        }
    };

    println!("modfetch v{}", modfetch::VERSION);
    println!("Modlist:   {}", link);
    println!("Directory: {}", config.modlist_dir.display());
    if let Some(size) = size {
        println!("Size:      {}", format_size(size));
    }
    println!();

    let bar = bytes_bar(size);
    let progress_bar = bar.clone();
    let phase_bar = bar.clone();
    let fetcher = SegmentedArchiveFetcher::new(transport, config)
        .with_progress(Arc::new(move |bytes: u64| progress_bar.set_position(bytes)))
        .with_phase_observer(Arc::new(move |phase: FetchPhase| {
            phase_bar.set_message(phase.to_string())
        }));

    let result = runtime.block_on(fetcher.fetch(&link, hash, &cancel));
    bar.finish_and_clear();
    report(result?);
    Ok(())
}

/// `--hash` describes a `--link`; a catalog entry brings its own hash.
fn check_args(args: &ModlistArgs) -> Result<(), CliError> {
    match (&args.link, &args.title, &args.hash) {
        (None, None, _) => Err(CliError::Config(
            "Either a modlist title or --link is required".to_string(),
        )),
        (None, Some(_), Some(_)) => Err(CliError::Config(
            "--hash can only be used together with --link".to_string(),
        )),
        _ => Ok(()),
    }
}

fn report(outcome: FetchOutcome) {
    if outcome.reused_existing {
        println!("Modlist already downloaded and verified:");
    } else {
        println!(
            "Downloaded modlist ({}):",
            format_size(outcome.bytes_downloaded)
        );
    }
    println!("  {}", outcome.path.display());
}

/// Find a modlist by exact title, then by unique case-insensitive substring.
fn find_modlist<'a>(lists: &'a [ModListMetadata], title: &str) -> Result<&'a ModListMetadata, CliError> {
    if let Some(list) = lists.iter().find(|l| l.title.eq_ignore_ascii_case(title)) {
        return Ok(list);
    }

    let needle = title.to_lowercase();
    let matches: Vec<&ModListMetadata> = lists
        .iter()
        .filter(|l| l.title.to_lowercase().contains(&needle))
        .collect();
    match matches.as_slice() {
        [list] => Ok(*list),
        [] => Err(CliError::ModlistNotFound(title.to_string())),
        many => Err(CliError::ModlistNotFound(format!(
            "{} is ambiguous, matches: {}",
            title,
            many.iter()
                .map(|l| l.title.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
