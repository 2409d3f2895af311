mod cli;
mod server;

use clap::Parser;
use cli::{Cli, Commands};
use exportbox::config::Config;
use exportbox::observability::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = Config::load()?;
    init_tracing(config.telemetry.log_format);

    match cli.command {
        Commands::Run(args) => server::run(config, args.address).await?,
        Commands::Formats => server::formats(config).await?,
    }

    Ok(())
}
