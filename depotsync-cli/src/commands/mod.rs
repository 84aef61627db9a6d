//! CLI subcommand implementations.

pub mod common;
pub mod inspect;
pub mod plan;
pub mod select;
pub mod snapshot;
pub mod verify;
