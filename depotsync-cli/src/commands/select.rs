//! `depotsync select`: pick the build and depots the configuration asks for.

use std::path::PathBuf;

use clap::Args;
use console::style;
use depotsync::manifest::{decode_product_manifest, parse_builds};
use depotsync::size::format_bytes;
use depotsync::EngineConfig;

use super::common::read_file;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct SelectArgs {
    /// Product manifest listing the build's depots
    pub product: PathBuf,

    /// Build listing to pick a build from
    #[arg(long)]
    pub builds: Option<PathBuf>,

    /// Depot language, overriding download.language
    #[arg(long)]
    pub language: Option<String>,

    /// Required bitness, overriding download.bitness
    #[arg(long)]
    pub bitness: Option<String>,
}

pub fn run(args: SelectArgs, config: &EngineConfig) -> Result<(), CliError> {
    let mut config = config.clone();
    if let Some(language) = args.language {
        config.language = language;
    }
    if args.bitness.is_some() {
        config.bitness = args.bitness;
    }

    if let Some(path) = &args.builds {
        let builds = parse_builds(&read_file(path)?)?;
        let build = config
            .select_build(&builds.items)
            .ok_or_else(|| CliError::NoMatchingBuild {
                generation: config.generation,
                platform: config.platform.clone(),
            })?;
        println!(
            "{} {} (generation {}, {}) {}",
            style("Build").bold(),
            build.build_id,
            build.generation,
            build.platform,
            build.version_name
        );
    }

    let product = decode_product_manifest(&read_file(&args.product)?)?;
    let depots = config.select_depots(&product.depots);
    println!(
        "{} {} of {} depot(s) for {}",
        style("Depots").bold(),
        depots.len(),
        product.depots.len(),
        config.language
    );
    for depot in &depots {
        println!(
            "  {}  {}  {}  [{}]",
            depot.product_id,
            depot.manifest,
            format_bytes(depot.size),
            depot.languages.join(", ")
        );
    }
    let total: u64 = depots.iter().map(|d| d.size).sum();
    println!("  Total:      {}", format_bytes(total));
    Ok(())
}
