//! `depotsync verify`: check an install against its manifest.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use console::style;
use depotsync::verify::{verify_with_progress, FailureReason, VerificationResult};
use indicatif::{ProgressBar, ProgressStyle};

use super::common::load_manifest;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Manifest describing the install
    pub manifest: PathBuf,

    /// Install directory to check
    pub install_dir: PathBuf,
}

pub fn run(args: VerifyArgs) -> Result<(), CliError> {
    let manifest = load_manifest(&args.manifest)?;
    if !args.install_dir.is_dir() {
        return Err(CliError::Config(format!(
            "install directory not found: {}",
            args.install_dir.display()
        )));
    }

    let bar = progress_bar(manifest.files.len() as u64);
    let result = verify_with_progress(&args.install_dir, &manifest.files, |_| bar.inc(1));
    bar.finish_and_clear();

    report(&result);
    if result.is_valid() {
        Ok(())
    } else {
        Err(CliError::InvalidInstall {
            failed: result.failures.len(),
            checked: result.checked,
        })
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let bar_style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
    .progress_chars("#>-");
    bar.set_style(bar_style);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn report(result: &VerificationResult) {
    if result.is_valid() {
        println!(
            "{} {} file(s) verified",
            style("✓").green().bold(),
            result.checked
        );
        return;
    }

    for failure in &result.failures {
        println!("  {} {}: {}", style("✗").red(), failure.path, failure.reason);
    }
    let missing = result.count(|r| {
        matches!(r, FailureReason::Missing | FailureReason::UnsafePath)
    });
    let size = result.count(|r| matches!(r, FailureReason::SizeMismatch { .. }));
    let hash = result.count(|r| matches!(r, FailureReason::HashMismatch { .. }));
    println!(
        "{} {} of {} file(s) failed ({} missing, {} wrong size, {} corrupt)",
        style("✗").red().bold(),
        result.failures.len(),
        result.checked,
        missing,
        size,
        hash
    );
}
