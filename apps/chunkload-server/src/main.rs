use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use chunkload_server::{ChunkServer, ServerConfig};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "chunkload-server")]
#[command(about = "Receives chunked uploads and merges them into files")]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, default_value = "chunkload-server.json")]
    config: PathBuf,

    /// Address to listen on, overrides the config file
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Storage root directory, overrides the config file
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunkload=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(root) = cli.root {
        config.storage_root = root;
    }

    let server = ChunkServer::new(config);
    tokio::spawn({
        let server = server.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                server.shutdown();
            }
        }
    });

    server.run().await.context("server failed")?;
    Ok(())
}
