//! `depotsync inspect`: summarize a manifest.

use std::path::PathBuf;

use clap::Args;
use console::style;
use depotsync::manifest::Manifest;
use depotsync::size::{calculate_total_size, format_bytes};

use super::common::load_manifest;
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Manifest file (binary or JSON, optionally compressed)
    pub manifest: PathBuf,

    /// List every file with its size
    #[arg(long)]
    pub files: bool,
}

pub fn run(args: InspectArgs) -> Result<(), CliError> {
    let manifest = load_manifest(&args.manifest)?;

    println!("{}", style(args.manifest.display()).bold());
    for line in summary_lines(&manifest) {
        println!("  {}", line);
    }

    if args.files {
        println!();
        for file in &manifest.files {
            let kind = if file.is_symlink() { "link" } else { "file" };
            println!("  {:>12}  {:<4}  {}", format_bytes(file.size()), kind, file.path());
        }
    }
    Ok(())
}

fn summary_lines(manifest: &Manifest) -> Vec<String> {
    let download = calculate_total_size(&manifest.files, &manifest.chunks);
    let mut lines = vec![
        format!("Format:     {:?} (version {})", manifest.format, manifest.version),
        format!("Files:      {}", manifest.files.len()),
        format!("Chunks:     {}", manifest.chunks.len()),
        format!("Installed:  {}", format_bytes(manifest.installed_size())),
        format!("Download:   {}", format_bytes(download)),
    ];
    if !manifest.meta.app_name.is_empty() {
        lines.push(format!(
            "App:        {} {}",
            manifest.meta.app_name, manifest.meta.build_version
        ));
    }
    if !manifest.meta.launch_exe.is_empty() {
        lines.push(format!("Launch:     {}", manifest.meta.launch_exe));
    }
    let executables = manifest.executable_files().count();
    if executables > 0 {
        lines.push(format!("Executable: {} file(s)", executables));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use depotsync::manifest::{ChunkCatalog, CustomFields, ManifestFormat, ManifestMeta};

    #[test]
    fn test_summary_skips_empty_metadata() {
        let manifest = Manifest {
            format: ManifestFormat::GogGen2,
            version: 2,
            header_size: 0,
            is_compressed: false,
            meta: ManifestMeta::default(),
            chunks: ChunkCatalog::dedup(Vec::new()),
            files: Vec::new(),
            custom_fields: CustomFields::new(Vec::new()),
        };

        let lines = summary_lines(&manifest);
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("GogGen2"));
        assert!(lines[3].ends_with("0.00 B"));
    }
}
