use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "exportbox")]
#[command(about = "Asynchronous export job pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the workers and the HTTP intake
    Run(RunArgs),
    /// List the formats the render provider supports
    Formats,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Address to bind the HTTP server to; overrides `server.bind_addr`
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
