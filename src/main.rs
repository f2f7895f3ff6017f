//! pipewright - a front-end asset pipeline for static web apps.

mod build;
mod cli;
mod config;
mod graph;
mod logger;
mod pipeline;
mod reload;
mod serve;
mod utils;
mod watch;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::PipelineConfig;
use pipeline::Toolchain;
use serve::serve_site;
use watch::watch_for_changes_blocking;

fn main() -> Result<()> {
    let cli: &'static Cli = Box::leak(Box::new(Cli::parse()));
    let config: &'static PipelineConfig = Box::leak(Box::new(PipelineConfig::load(cli)?));
    let tools: &'static Toolchain = Box::leak(Box::new(Toolchain::from_config(config)));

    match cli.command() {
        Commands::Clean => build::clean(config),
        Commands::Build { .. } => build::build(config, tools),
        Commands::Watch { .. } => {
            build::build(config, tools)?;
            watch_for_changes_blocking(config, tools)
        }
        Commands::Serve { .. } => {
            build::build(config, tools)?;
            serve_site(config, tools)
        }
    }
}
