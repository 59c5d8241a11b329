mod cli;
mod config;
mod error;
mod output;
mod report;
mod repro;
mod source;
mod triage;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose() {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    output::print_banner();

    info!("Starting syztriage - Kernel Fuzzer Bug Triage Tool");
    let clean = cli.execute().await?;

    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
