mod commands;
mod config;
mod docs;
mod error;
mod lock;
mod progress;
mod session;
mod state;
mod traversal;

use clap::Parser;
use tracing::{warn, Level};

use commands::Cli;
use config::Config;
use error::AnnotateError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let config = Config::from_env()?;

    let result = commands::run(config, cli.command).await;
    if let Err(e) = &result {
        if e.downcast_ref::<AnnotateError>().is_some_and(AnnotateError::is_transient) {
            warn!("document is busy, try again");
        }
    }
    result
}
