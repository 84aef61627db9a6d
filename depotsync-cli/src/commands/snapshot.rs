//! `depotsync snapshot`: inspect or discard resume state.

use std::path::PathBuf;

use clap::Subcommand;
use depotsync::progress::{delete_snapshot, load_snapshot, snapshot_path};
use depotsync::session::{is_partial_install, FileMarkers};
use depotsync::size::format_bytes;

use crate::error::CliError;

/// Snapshot action subcommands.
#[derive(Debug, Subcommand)]
pub enum SnapshotAction {
    /// Show the saved byte count and completed depots
    Show {
        /// Install directory holding the snapshot
        install_dir: PathBuf,
    },
    /// Delete the saved snapshot so the next download starts over
    Clear {
        /// Install directory holding the snapshot
        install_dir: PathBuf,
    },
}

/// Run a snapshot subcommand.
pub fn run(action: SnapshotAction) -> Result<(), CliError> {
    match action {
        SnapshotAction::Show { install_dir } => {
            println!("Snapshot: {}", snapshot_path(&install_dir).display());
            match load_snapshot(&install_dir) {
                Some(snapshot) => {
                    println!("  Downloaded: {}", format_bytes(snapshot.bytes_downloaded));
                    let depots: Vec<String> = snapshot
                        .completed_depot_ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect();
                    if depots.is_empty() {
                        println!("  Depots:     none completed");
                    } else {
                        println!("  Depots:     {}", depots.join(", "));
                    }
                }
                None => println!("  No snapshot saved"),
            }
            let partial = is_partial_install(&install_dir, &FileMarkers);
            println!("  Partial:    {}", if partial { "yes" } else { "no" });
            Ok(())
        }
        SnapshotAction::Clear { install_dir } => {
            delete_snapshot(&install_dir)?;
            println!("Cleared snapshot in {}", install_dir.display());
            Ok(())
        }
    }
}
