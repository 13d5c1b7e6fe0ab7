mod cli;
mod config;
mod controller;
mod error;
mod fake;
mod saver;

use clap::Parser as _;
use std::process::ExitCode;

use crate::cli::SaverCLI;

fn main() -> ExitCode {
    let cli = SaverCLI::parse();

    let level = match cli.verbosity() {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = cli.run() {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
