//! regulon - ensemble regulator ranking from the command line

use clap::Parser;
use regulon::cli::{cmd_solve, cmd_solvers, Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "regulon=debug" } else { "regulon=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Solve(args) => cmd_solve(&args)?,
        Commands::Solvers => cmd_solvers()?,
    }

    Ok(())
}
