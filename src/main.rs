use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use cthulhu_broker::broker::Broker;
use cthulhu_broker::config::Config;
use cthulhu_broker::queue::{InMemoryQueue, QueueBackend};
use cthulhu_broker::transport;

#[derive(Parser)]
#[command(name = "cthulhu-brokerd", about = "Message broker for authenticated socket sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker and accept connections until interrupted.
    Serve {
        #[arg(long, default_value = "cthulhu-broker.toml")]
        config: PathBuf,
    },
    /// Print the effective configuration (file + env overrides) as TOML.
    Config {
        #[arg(long, default_value = "cthulhu-broker.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("PANIC: {panic_info:?}");
    }));

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => serve(config).await,
        Commands::Config { config } => print_config(config),
    }
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;
    info!("[main] starting on {} (scheme={})", config.bind_addr, config.scheme);

    let queue: Arc<dyn QueueBackend> = Arc::new(InMemoryQueue::new());
    let broker = Broker::init(config.clone(), queue);
    broker.start().await;

    let transport_broker = broker.clone();
    let transport_config = config.clone();
    let transport_handle = tokio::spawn(async move { transport::serve(transport_broker, transport_config).await });

    tokio::signal::ctrl_c().await?;
    info!("[main] shutdown signal received");
    broker.shutdown().await;
    transport_handle.abort();

    Ok(())
}

fn print_config(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
