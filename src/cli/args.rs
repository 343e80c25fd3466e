//! Command-line argument parsing

use clap::{Parser, Subcommand};

use crate::option::{Common, Platform, Target};

#[derive(Parser, Debug, Clone)]
#[command(name = "artifact-target")]
#[command(about = "Resolve references against OCI registries and image layouts")]
#[command(version, author)]
pub struct Args {
    #[command(flatten)]
    pub common: Common,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve a tag or digest to a manifest descriptor
    Resolve {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        platform: Platform,

        /// Print only the digest
        #[arg(long = "short")]
        short: bool,
    },
    /// List tags of a repository or layout
    Tags {
        #[command(flatten)]
        target: Target,
    },
    /// List artifacts referring to a manifest
    Referrers {
        #[command(flatten)]
        target: Target,

        /// Only list referrers of this artifact type
        #[arg(long = "artifact-type")]
        artifact_type: Option<String>,
    },
}
