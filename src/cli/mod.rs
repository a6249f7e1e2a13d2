//! CLI module for the Halldyll engine.
//!
//! This module provides the command-line interface for running plan files
//! and inspecting the snapshot store.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
