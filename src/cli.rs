use std::path::PathBuf;

use clap::{Parser, Subcommand};

use medcode::{CodeFamily, ImportFormat, SuggestMethod};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Verbosity level (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Families a command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyArg {
    One(CodeFamily),
    Both,
}

impl FamilyArg {
    pub fn families(self) -> Vec<CodeFamily> {
        match self {
            FamilyArg::One(family) => vec![family],
            FamilyArg::Both => CodeFamily::ALL.to_vec(),
        }
    }
}

impl std::str::FromStr for FamilyArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "both" | "all" => Ok(FamilyArg::Both),
            other => other.parse().map(FamilyArg::One),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Suggest codes for a free-text clinical description
    Suggest {
        /// e.g. "chest pain" or "appendectomy"
        query: String,

        /// diagnosis, procedure or both
        #[clap(short, long, default_value = "both")]
        family: FamilyArg,

        /// Max suggestions per family (config default_limit when omitted)
        #[clap(short, long)]
        limit: Option<usize>,

        /// hybrid, semantic or fuzzy
        #[clap(short, long, default_value = "hybrid")]
        method: SuggestMethod,

        /// Print JSON instead of a table
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Convert a raw code table into a family catalog
    Import {
        #[clap(short, long)]
        family: CodeFamily,

        /// json, csv or cdc
        #[clap(long, default_value = "json")]
        format: ImportFormat,

        /// Raw source file
        input: PathBuf,
    },

    /// Embed a family catalog and write its embedding store
    BuildIndex {
        /// diagnosis, procedure or both
        #[clap(short, long, default_value = "both")]
        family: FamilyArg,

        /// Hide the progress bar
        #[clap(long, default_value = "false")]
        quiet: bool,
    },

    /// Show configuration and artifact status
    Info {
        /// Load each family to report code counts
        #[clap(long, default_value = "false")]
        load: bool,
    },
}
