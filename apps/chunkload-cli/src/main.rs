mod format;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chunkload_fingerprint::{FingerprintEngine, FingerprintMode};
use chunkload_protocol::ChunkStatus;
use chunkload_tasks::PauseGate;
use chunkload_transfer::{ChunkReader, DEFAULT_CHUNK_SIZE};
use chunkload_upload::{
    HttpTransport, UploadConfig, UploadController, UploadEvent, UploadOutcome, UploadSession,
};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::format::{format_rate, format_size};

#[derive(Parser)]
#[command(name = "chunkload-cli")]
#[command(about = "Upload files to a chunkload server in resumable chunks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file. Type p, r or c and Enter to pause, resume or cancel.
    Upload {
        path: PathBuf,

        /// Base URL of the chunkload server
        #[arg(short, long, default_value = "http://127.0.0.1:3000")]
        server: String,

        #[command(flatten)]
        options: UploadOptions,
    },
    /// Fingerprint a file and print its chunk table without uploading.
    Plan {
        path: PathBuf,

        #[command(flatten)]
        options: UploadOptions,
    },
}

#[derive(Args)]
struct UploadOptions {
    /// Path to a JSON upload configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Chunk uploads in flight at once (0 = unbounded)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Use a sampled fingerprint for large files
    #[arg(long)]
    sampled: bool,
}

impl UploadOptions {
    fn resolve(&self) -> anyhow::Result<UploadConfig> {
        let mut config = match &self.config {
            Some(path) => UploadConfig::load(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => UploadConfig::default(),
        };
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if self.sampled {
            config.fingerprint_mode = FingerprintMode::Sampled;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chunkload=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Upload {
            path,
            server,
            options,
        } => upload(&path, &server, options.resolve()?).await,
        Commands::Plan { path, options } => plan(&path, options.resolve()?).await,
    }
}

async fn upload(path: &Path, server: &str, config: UploadConfig) -> anyhow::Result<()> {
    let transport = Arc::new(HttpTransport::new(server));
    let mut controller = UploadController::new(config, transport);
    let mut events = controller
        .take_events()
        .context("event receiver already taken")?;
    let controller = Arc::new(controller);

    let session = controller.select_file(path).await?;
    println!(
        "{} ({}) in {} chunk(s) to {server}",
        session.file_name,
        format_size(session.total_size),
        session.chunks_total()
    );

    // Stdin is read on a plain thread so a pending read never holds up exit.
    let (lines_tx, mut lines) = mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if lines_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut run = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.start().await }
    });

    let result = loop {
        tokio::select! {
            result = &mut run => break result.context("upload task panicked")?,
            Some(line) = lines.recv() => command(&controller, line.trim()).await,
            Some(event) = events.recv() => print_event(&event),
        }
    };
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    match result? {
        UploadOutcome::Completed(summary) => {
            if let Some(fingerprint) = summary.fingerprint {
                println!("fingerprint {fingerprint}");
            }
            Ok(())
        }
        UploadOutcome::Cancelled => bail!("upload cancelled"),
    }
}

async fn command(controller: &UploadController, line: &str) {
    let result = match line {
        "p" | "pause" => controller.pause().await,
        "r" | "resume" => controller.resume().await,
        "c" | "cancel" => {
            controller.cancel().await;
            Ok(())
        }
        "" => return,
        other => {
            eprintln!("unknown command {other:?} (p = pause, r = resume, c = cancel)");
            return;
        }
    };
    if let Err(e) = result {
        eprintln!("{e}");
    }
}

fn print_event(event: &UploadEvent) {
    match event {
        UploadEvent::StateChanged { state } => println!("[{state}]"),
        UploadEvent::HashProgress { percent } => println!("hashing {percent:.0}%"),
        UploadEvent::Fingerprinted { .. } => {}
        UploadEvent::ChunkSettled { index, status } => {
            if *status == ChunkStatus::Failed {
                println!("chunk {index} failed");
            }
        }
        UploadEvent::Progress {
            uploaded_bytes,
            total_bytes,
            percent,
            bytes_per_second,
        } => println!(
            "uploaded {}/{} ({percent:.1}%) {}",
            format_size(*uploaded_bytes),
            format_size(*total_bytes),
            format_rate(*bytes_per_second)
        ),
        UploadEvent::Completed {
            file_name,
            total_bytes,
        } => println!("{file_name} uploaded ({})", format_size(*total_bytes)),
        UploadEvent::Failed { error } => eprintln!("upload failed: {error}"),
    }
}

async fn plan(path: &Path, config: UploadConfig) -> anyhow::Result<()> {
    let reader = ChunkReader::new(path);
    let total_size = reader.file_size().await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let chunk_size = match config.chunk_size {
        0 => DEFAULT_CHUNK_SIZE,
        n => n,
    };
    let mut session = UploadSession::new(path, file_name, total_size, chunk_size);

    println!(
        "{} ({}) chunk size {}",
        session.file_name,
        format_size(total_size),
        format_size(session.chunk_size)
    );
    if !session.chunked {
        println!("fits in one chunk, sent in a single request");
        return Ok(());
    }

    let mode = config.mode_for(total_size);
    let engine = FingerprintEngine::new(PauseGate::new());
    session.fingerprint = Some(engine.compute(&reader, &session.chunks, mode, |_| {}).await?);

    println!("{:>6}  {:<40}  {:>8}  status", "index", "id", "size");
    for (chunk, status) in session.chunks.iter().zip(&session.chunk_status) {
        let id = session
            .chunk_id(chunk.index, &config.delimiter)
            .map(|id| id.to_string())
            .unwrap_or_default();
        println!(
            "{:>6}  {id:<40}  {:>8}  {}",
            chunk.index,
            format_size(chunk.size()),
            status.label()
        );
    }
    Ok(())
}
