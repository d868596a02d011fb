mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use libsdfs::LocalConnector;
use sdfs_env::{EnvConfig, PosixEnv, SdfsEnv};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_URI: &str = "sdfs:localhost:9000";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EnvConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EnvConfig::default(),
    };
    let uri = args
        .uri
        .clone()
        .or_else(|| config.uri.clone())
        .unwrap_or_else(|| DEFAULT_URI.to_string());

    let base = Arc::new(PosixEnv::new());
    config.apply(base.as_ref());
    let connector = LocalConnector::new(&args.root);
    let env = SdfsEnv::connect(&uri, &connector, base)
        .with_context(|| format!("Failed to connect to {uri}"))?;

    let stdout = std::io::stdout();
    commands::run(&env, &args.command, &mut stdout.lock())
}
