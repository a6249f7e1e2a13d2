//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Halldyll engine - runs precomputed deployment plans step by step.
#[derive(Parser, Debug)]
#[command(name = "halldyll-engine")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "HALLDYLL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the steps of a plan file against the recorded snapshot.
    Apply {
        /// Plan file to run.
        #[arg(short, long)]
        plan: PathBuf,

        /// Maximum number of steps in flight (overrides the configuration).
        #[arg(long, env = "HALLDYLL_PARALLEL")]
        parallel: Option<usize>,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show what a plan file would do without changing anything.
    Preview {
        /// Plan file to preview.
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Inspect or repair the snapshot store.
    State {
        /// Stack whose snapshot to use.
        #[arg(short, long, env = "HALLDYLL_STACK")]
        stack: String,

        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the recorded resources.
    Show,

    /// Release the update lock.
    Unlock {
        /// Lock ID to release.
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
