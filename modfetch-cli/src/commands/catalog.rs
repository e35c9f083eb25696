//! Catalog command - list published modlists.

use console::style;
use modfetch::modlist::{fetch_catalog, ModListMetadata};

use super::common::{load_config, runtime, shutdown_token, transport};
use crate::error::CliError;
use crate::GlobalArgs;

/// Arguments for the catalog command.
pub struct CatalogArgs {
    pub repositories: String,
    pub game: Option<String>,
    pub include_nsfw: bool,
}

/// Run the catalog command.
pub fn run(global: &GlobalArgs, args: CatalogArgs) -> Result<(), CliError> {
    let config = load_config(global.config.as_deref())?;
    let transport = transport(&config)?;
    let cancel = shutdown_token()?;

    let lists = runtime()?.block_on(fetch_catalog(
        transport.as_ref(),
        &args.repositories,
        config.max_concurrent_downloads,
        config.stall_timeout,
        &cancel,
    ))?;

    let shown: Vec<&ModListMetadata> = lists
        .iter()
        .filter(|list| args.include_nsfw || !list.nsfw)
        .filter(|list| match &args.game {
            Some(game) => list.game.eq_ignore_ascii_case(game),
            None => true,
        })
        .collect();

    if shown.is_empty() {
        println!("No modlists found.");
        return Ok(());
    }

    for list in &shown {
        let marker = if list.official { " (official)" } else { "" };
        println!("{}{}", style(&list.title).bold(), marker);
        println!("  Game:       {}", list.game);
        println!("  Repository: {}", list.repository_name);
        for line in list.summary().lines() {
            println!("  {}", line);
        }
        if list.force_down {
            println!("  {}", style("Currently unavailable").yellow());
        }
        println!();
    }
    println!("{} of {} modlists shown", shown.len(), lists.len());
    Ok(())
}
