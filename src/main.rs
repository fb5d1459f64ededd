// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use quorum_engine::{Engine, SessionRegistry, SkillLibrary};
use quorum_model::HttpChatClient;
use quorum_server::ServeError;
use quorum_store::{CollabStore, EventBus};

// sysexits-style codes surfaced to service managers and scripts.
const EXIT_CONFIG: u8 = 64;
const EXIT_UNAVAILABLE: u8 = 69;
const EXIT_INTERNAL: u8 = 70;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match quorum_config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("quorum: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Commands::ValidateConfig => match config.validate() {
            Ok(warnings) => {
                for w in warnings {
                    eprintln!("warning: {w}");
                }
                println!("config ok: {} slot(s)", config.slots.len());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("quorum: {e:#}");
                ExitCode::from(EXIT_CONFIG)
            }
        },
        Commands::Serve { bind } => serve(config, bind).await,
    }
}

async fn serve(config: quorum_config::Config, bind: Option<String>) -> ExitCode {
    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let skills_dir = skills_dir(&config);

    // Build the services in dependency order: bus → store → registry →
    // engine → http surface.  Teardown happens in reverse inside serve():
    // sessions are cancelled, subscribers drain as the bus drops.
    let bus = Arc::new(EventBus::new(
        config.engine.bus_capacity,
        config.engine.max_subscribers,
    ));
    let store = {
        let store = CollabStore::new(bus, config.engine.log_retention);
        match &config.persistence.root {
            Some(root) => Arc::new(store.with_persistence(root)),
            None => Arc::new(store),
        }
    };
    let registry = Arc::new(SessionRegistry::new(config.engine.max_sessions));
    let sandbox = quorum_sandbox::from_config(&config.sandbox);
    let skills = match SkillLibrary::open(&skills_dir) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("quorum: opening skill library {skills_dir}: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let engine = Arc::new(Engine::new(
        quorum_config::SharedConfig::new(config),
        store,
        Arc::new(HttpChatClient::new()),
        registry,
        sandbox,
        skills,
    ));

    match quorum_server::serve(&addr, engine, VERSION).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ServeError::Bind { addr, source }) => {
            eprintln!("quorum: cannot bind {addr}: {source}");
            ExitCode::from(EXIT_UNAVAILABLE)
        }
        Err(e) => {
            eprintln!("quorum: {e}");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

fn skills_dir(config: &quorum_config::Config) -> String {
    if let Some(dir) = &config.sandbox.skills_dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("quorum/skills")
        .display()
        .to_string()
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
