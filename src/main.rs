use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod cmd;

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.cmd {
        cli::Cmd::Send(opts) => cmd::send::run(opts),
        cli::Cmd::Sim(opts) => cmd::sim::run(opts),
        cli::Cmd::Gen(opts) => cmd::generate::run(opts),
    }
}
