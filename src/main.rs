//! graphloom binary entry point.

// The binary reports fatal errors on stderr before exiting.
#![allow(clippy::print_stderr)]

use clap::Parser;
use graphloom::cli::{Cli, run};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // .env is optional; missing files are fine.
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("graphloom=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error [{}]: {err}", err.kind());
        std::process::exit(1);
    }
    Ok(())
}
