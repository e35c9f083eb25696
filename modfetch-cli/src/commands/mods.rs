//! Mods command - download the Nexus Mods archives a modlist references.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use indicatif::{MultiProgress, ProgressBar};
use modfetch::modlist::load_downloads;
use modfetch::nexus::{
    ConcurrentFileDownloader, DownloadDescriptor, DownloadEvent, EventObserver, NexusApiResolver,
    SkipReason,
};
use modfetch::format_size;

use super::common::{bytes_style, count_style, load_config, runtime, shutdown_token, transport, DownloadArgs};
use crate::error::CliError;
use crate::GlobalArgs;

/// Arguments for the mods command.
pub struct ModsArgs {
    pub modlist: PathBuf,
    pub cookie: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub start: usize,
    pub head_probe: bool,
    pub list_only: bool,
    pub download: DownloadArgs,
}

/// Run the mods command.
pub fn run(global: &GlobalArgs, args: ModsArgs) -> Result<(), CliError> {
    let config = args.download.apply(load_config(global.config.as_deref())?);
    let runtime = runtime()?;

    let descriptors = runtime.block_on(load_downloads(&args.modlist))?;
    if args.list_only {
        print_descriptors(&descriptors);
        return Ok(());
    }
    if args.start > descriptors.len() {
        return Err(CliError::Config(format!(
            "--start {} is past the end of the list ({} downloads)",
            args.start,
            descriptors.len()
        )));
    }

    let cookie = read_cookie(&args)?;
    let transport = transport(&config)?;
    let cancel = shutdown_token()?;

    println!("modfetch v{}", modfetch::VERSION);
    println!("Modlist:   {}", args.modlist.display());
    println!("Downloads: {} (starting at {})", descriptors.len(), args.start);
    println!("Directory: {}", config.download_dir.display());
    println!("Parallel:  {}", config.max_concurrent_downloads);
    println!();

    let progress = Arc::new(SessionProgress::new(descriptors.len() - args.start));
    let resolver = Arc::new(
        NexusApiResolver::new(transport.clone(), cookie).with_stall_timeout(config.stall_timeout),
    );
    let downloader = ConcurrentFileDownloader::new(transport, resolver, config)
        .with_head_probe(args.head_probe)
        .with_observer(progress.observer());

    let result = runtime.block_on(downloader.download_all(&descriptors, args.start, &cancel));
    progress.finish();
    let summary = result?;

    println!(
        "Downloaded {} files ({}), skipped {}",
        summary.downloaded,
        format_size(summary.bytes),
        summary.skipped
    );
    Ok(())
}

fn read_cookie(args: &ModsArgs) -> Result<String, CliError> {
    let cookie = match (&args.cookie, &args.cookie_file) {
        (Some(cookie), _) => cookie.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read cookie file {}: {}", path.display(), e))
        })?,
        (None, None) => {
            return Err(CliError::Config(
                "A Nexus Mods session cookie is required. Use --cookie or --cookie-file".to_string(),
            ))
        }
    };
    let cookie = cookie.trim().to_string();
    if cookie.is_empty() {
        return Err(CliError::Config("The session cookie is empty".to_string()));
    }
    Ok(cookie)
}

fn print_descriptors(descriptors: &[DownloadDescriptor]) {
    for (index, d) in descriptors.iter().enumerate() {
        println!("{:>4}  {}  ({})", index, d.file_name, format_size(d.size));
        println!("      {}", d.mod_page_url());
    }
    println!();
    let total: u64 = descriptors.iter().map(|d| d.size).sum();
    println!("{} downloads, {}", descriptors.len(), format_size(total));
}

/// Progress bars for one session: an overall item counter plus one bar per active item.
struct SessionProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    items: Mutex<HashMap<usize, ProgressBar>>,
}

impl SessionProgress {
    fn new(total: usize) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total as u64));
        overall.set_style(count_style());
        Self {
            multi,
            overall,
            items: Mutex::new(HashMap::new()),
        }
    }

    fn observer(self: &Arc<Self>) -> EventObserver {
        let progress = Arc::clone(self);
        Arc::new(move |event: &DownloadEvent| progress.handle(event))
    }

    fn handle(&self, event: &DownloadEvent) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        match event {
            DownloadEvent::Started { index, name, size } => {
                let bar = self.multi.add(ProgressBar::new(*size));
                bar.set_style(bytes_style());
                bar.set_message(name.to_string());
                items.insert(*index, bar);
            }
            DownloadEvent::Progress { index, bytes, total, .. } => {
                if let Some(bar) = items.get(index) {
                    if let Some(total) = total {
                        bar.set_length(*total);
                    }
                    bar.set_position(*bytes);
                }
            }
            DownloadEvent::Skipped { index, name, reason } => {
                if let Some(bar) = items.remove(index) {
                    bar.finish_and_clear();
                }
                self.overall.inc(1);
                let why = match reason {
                    SkipReason::TooLarge { size, limit } => {
                        format!("larger than {} ({})", format_size(*limit), format_size(*size))
                    }
                    SkipReason::AlreadyPresent => "already downloaded".to_string(),
                    SkipReason::ResolvedNameExists { file_name } => {
                        format!("already downloaded as {}", file_name)
                    }
                };
                self.overall.println(format!("Skipped {}: {}", name, why));
            }
            DownloadEvent::Completed { index, name, .. } => {
                if let Some(bar) = items.remove(index) {
                    bar.finish_and_clear();
                }
                self.overall.inc(1);
                self.overall.set_message(name.to_string());
            }
        }
    }

    fn finish(&self) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        for (_, bar) in items.drain() {
            bar.abandon();
        }
        self.overall.finish_and_clear();
    }
}
