// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-model LLM collaboration orchestrator.
///
/// A configurable team of slots answers each request through a three-phase
/// protocol (proposal → refinement → weighted vote); the `dexter` slot
/// speaks for the team.  With no subcommand, `serve` runs.
#[derive(Parser, Debug)]
#[command(name = "quorum", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP surface and serve collaboration sessions.
    Serve {
        /// Listen address override (default from config, 127.0.0.1:8787).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the effective merged configuration and exit.
    ShowConfig,

    /// Parse and validate the configuration, then exit without serving.
    ValidateConfig,
}
