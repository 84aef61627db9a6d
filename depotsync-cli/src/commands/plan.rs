//! `depotsync plan`: resolve chunk URLs and download sizes.

use std::path::PathBuf;

use clap::Args;
use console::style;
use depotsync::locator::{ChunkLocator, UrlSelection};
use depotsync::plan::DownloadPlan;
use depotsync::select::separate_support_files;
use depotsync::size::format_bytes;
use depotsync::EngineConfig;

use super::common::load_manifest;
use crate::error::CliError;

/// URLs printed unless `--all-urls` is given.
const SAMPLE_URLS: usize = 5;

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Manifest file to plan
    pub manifest: PathBuf,

    /// CDN base URL (repeat for several mirrors)
    #[arg(long = "base-url", required = true)]
    pub base_urls: Vec<String>,

    /// Spread chunks across base URLs instead of always using the first
    #[arg(long)]
    pub round_robin: bool,

    /// Leave redistributable support files out of the plan
    #[arg(long)]
    pub skip_support: bool,

    /// Print every chunk URL
    #[arg(long)]
    pub all_urls: bool,
}

pub fn run(args: PlanArgs, config: &EngineConfig) -> Result<(), CliError> {
    let manifest = load_manifest(&args.manifest)?;

    let selection = if args.round_robin {
        UrlSelection::RoundRobin
    } else {
        config.url_selection
    };
    let locator = ChunkLocator::new(selection);

    let (game, support) = separate_support_files(&manifest.files);
    let files = if args.skip_support {
        game
    } else {
        game.into_iter().chain(support).collect()
    };

    let plan = DownloadPlan::build(&manifest, files, &locator, &args.base_urls)?;

    println!("{}", style("Download plan").bold());
    println!("  Files:      {}", plan.files.len());
    println!("  Chunks:     {}", plan.chunk_count());
    println!("  Download:   {}", format_bytes(plan.download_size));
    println!("  Unique:     {}", format_bytes(plan.unique_download_size));
    println!("  Installed:  {}", format_bytes(plan.installed_size));

    let shown = if args.all_urls {
        plan.chunk_hashes.len()
    } else {
        SAMPLE_URLS
    };
    println!();
    for hash in plan.chunk_hashes.iter().take(shown) {
        match (plan.urls.get(hash), plan.ranges.get(hash)) {
            (Some(url), Some(range)) => println!("  {}  Range: {}", url, range.header_value()),
            (Some(url), None) => println!("  {}", url),
            _ => {}
        }
    }
    let hidden = plan.chunk_hashes.len().saturating_sub(shown);
    if hidden > 0 {
        println!("  {}", style(format!("... {} more", hidden)).dim());
    }
    Ok(())
}
