mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod output;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
};
use anyhow::Result;
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use std::process;
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        #[cfg(feature = "colored-output")]
        {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
        }
        #[cfg(not(feature = "colored-output"))]
        {
            eprintln!("Error: {:#}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let _guard = logging::init_logging(args.verbose, args.log_dir.as_deref())?;

    let config = AppConfig::load(&args)?;
    debug!(config = ?config, "Effective configuration");

    let executor = CommandExecutor::new(config, args.token.clone());

    match args.command {
        Commands::Watch => executor.watch().await?,
        Commands::List {
            page,
            size,
            unread_only,
            json,
        } => executor.list(page, size, unread_only, json).await?,
        Commands::Unread => executor.unread().await?,
        Commands::Read { id } => executor.read(id).await?,
        Commands::ReadAll => executor.read_all().await?,
        Commands::ReadBatch { ids } => executor.read_batch(&ids).await?,
        Commands::Delete { ids } => executor.delete(&ids).await?,
        Commands::RegisterDevice {
            device_token,
            platform,
        } => {
            executor
                .register_device(&device_token, platform.as_deref())
                .await?
        }
        Commands::Push { file } => executor.push(&file).await?,
        Commands::Config => executor.show_config()?,
    }

    Ok(())
}
