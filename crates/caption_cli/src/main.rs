mod cli;
mod commands;
mod config;

use clap::Parser;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();
    engine_logging::initialize(&cli.log_destination(), cli.log_level);

    if let Err(err) = commands::run(cli) {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
