//! Subcommand implementations

pub mod cluster;
pub mod jobs;
pub mod tasks;
