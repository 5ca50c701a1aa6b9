//! halopipe command line interface.
//!
//! One batch run per invocation, in one of two topologies:
//!
//! - `run` — single process; the coordinator and all workers share the
//!   process, connected over in-process channels.
//! - `coordinator` / `worker` — one process per rank, connected over TCP.
//!   Start the coordinator first, then one worker process per remaining rank.
//!
//! `init-config` writes a default configuration file for editing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use halopipe::image::io as image_io;
use halopipe::pipeline::{run_local, Coordinator, Worker};
use halopipe::transport::{tcp, Channel};
use halopipe::{
    backend_from_name, init_daemon_logging, init_logging, KernelTable, PipelineConfig,
};

/// Distributed halo-exchange convolution pipeline
#[derive(Parser, Debug)]
#[command(name = "halopipe")]
#[command(about = "Three-layer convolution filter pipeline over cooperating workers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process an image with an in-process worker topology
    Run {
        /// Input image path
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output image path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of workers (including the coordinator)
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Convolution backend (host, lanes, gpu)
        #[arg(short, long, default_value = "lanes")]
        backend: String,

        /// Read run settings from a config file instead of flags
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Run the coordinator of a TCP topology
    Coordinator {
        /// Input image path
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output image path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Total worker count, including this coordinator
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Listen address for worker connections
        #[arg(long, default_value = "127.0.0.1:4400")]
        listen: SocketAddr,

        /// Convolution backend (host, lanes, gpu)
        #[arg(short, long, default_value = "lanes")]
        backend: String,

        /// Read run settings from a config file instead of flags
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Log level
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Run one worker of a TCP topology
    Worker {
        /// This worker's rank (1-based; rank 0 is the coordinator)
        #[arg(short, long)]
        rank: u32,

        /// Coordinator address
        #[arg(long, default_value = "127.0.0.1:4400")]
        connect: SocketAddr,

        /// Convolution backend (host, lanes, gpu)
        #[arg(short, long, default_value = "lanes")]
        backend: String,

        /// Refuse to join any run but this one
        #[arg(long)]
        run_id: Option<Uuid>,

        /// Log level
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Write a default configuration file
    InitConfig {
        /// Where to write the config
        #[arg(short, long, default_value = "halopipe.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            workers,
            backend,
            config,
            log_level,
        } => {
            let settings = resolve_settings(config, input, output, workers, backend)?;
            init_logging(&log_level)?;
            cmd_run(settings).await
        }

        Commands::Coordinator {
            input,
            output,
            workers,
            listen,
            backend,
            config,
            log_level,
        } => {
            let (settings, listen) = match config {
                Some(path) => {
                    let cfg =
                        PipelineConfig::load(&path).context("failed to load configuration")?;
                    if cfg.logging.log_to_file {
                        init_daemon_logging(&cfg.logging.level, cfg.logging.log_dir.clone())?;
                    } else {
                        init_logging(&cfg.logging.level)?;
                    }
                    let listen = cfg.listen_addr()?;
                    (Settings::from_config(&cfg)?, listen)
                }
                None => {
                    init_logging(&log_level)?;
                    (
                        Settings::from_flags(input, output, workers, backend)?,
                        listen,
                    )
                }
            };
            cmd_coordinator(settings, listen).await
        }

        Commands::Worker {
            rank,
            connect,
            backend,
            run_id,
            log_level,
        } => {
            init_logging(&log_level)?;
            cmd_worker(rank, connect, &backend, run_id).await
        }

        Commands::InitConfig { path } => {
            let config = PipelineConfig::default();
            config
                .save(&path)
                .context("failed to write configuration")?;
            println!("wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

/// Effective run settings after config/flag resolution.
struct Settings {
    input: PathBuf,
    output: PathBuf,
    workers: usize,
    backend: String,
}

impl Settings {
    fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            input: config.run.input.clone(),
            output: config.run.output.clone(),
            workers: config.run.workers,
            backend: config.run.backend.clone(),
        })
    }

    fn from_flags(
        input: Option<PathBuf>,
        output: Option<PathBuf>,
        workers: usize,
        backend: String,
    ) -> Result<Self> {
        Ok(Self {
            input: input.context("--input is required without --config")?,
            output: output.context("--output is required without --config")?,
            workers,
            backend,
        })
    }
}

fn resolve_settings(
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    workers: usize,
    backend: String,
) -> Result<Settings> {
    match config {
        Some(path) => {
            let cfg = PipelineConfig::load(&path).context("failed to load configuration")?;
            Settings::from_config(&cfg)
        }
        None => Settings::from_flags(input, output, workers, backend),
    }
}

/// Single-process run over in-process channels.
async fn cmd_run(settings: Settings) -> Result<()> {
    let kernels = Arc::new(KernelTable::production());
    let backend = backend_from_name(&settings.backend)?;

    let image = image_io::load_grayscale(&settings.input)
        .with_context(|| format!("failed to load {}", settings.input.display()))?;
    info!(
        rows = image.rows(),
        cols = image.cols(),
        workers = settings.workers,
        "image loaded"
    );

    let result = run_local(
        image,
        settings.workers,
        &halopipe::Layer::ALL,
        kernels,
        backend,
    )
    .await?;

    image_io::save_grayscale(&result, &settings.output)
        .with_context(|| format!("failed to save {}", settings.output.display()))?;
    info!(output = %settings.output.display(), "result written");
    Ok(())
}

/// Coordinator of a TCP topology: accept workers, run, save.
async fn cmd_coordinator(settings: Settings, listen: SocketAddr) -> Result<()> {
    let kernels = Arc::new(KernelTable::production());
    let backend = backend_from_name(&settings.backend)?;
    let run_id = Uuid::new_v4();

    let image = image_io::load_grayscale(&settings.input)
        .with_context(|| format!("failed to load {}", settings.input.display()))?;

    info!(run = %run_id, workers = settings.workers, "waiting for workers");
    let listener = tcp::bind(listen).await?;
    let channels: Vec<Box<dyn Channel>> =
        tcp::accept_workers(&listener, run_id, settings.workers)
            .await?
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Channel>)
            .collect();

    let mut coordinator =
        Coordinator::new(run_id, settings.workers, channels, kernels, backend)?;
    let result = coordinator.run(image).await?;

    image_io::save_grayscale(&result, &settings.output)
        .with_context(|| format!("failed to save {}", settings.output.display()))?;
    info!(output = %settings.output.display(), "result written");
    Ok(())
}

/// One remote worker of a TCP topology.
async fn cmd_worker(
    rank: u32,
    connect: SocketAddr,
    backend: &str,
    run_id: Option<Uuid>,
) -> Result<()> {
    if rank == 0 {
        anyhow::bail!("rank 0 is the coordinator; workers start at rank 1");
    }

    let kernels = Arc::new(KernelTable::production());
    let backend = backend_from_name(backend)?;

    let (channel, run) = tcp::connect(connect, rank, run_id).await?;
    info!(rank, run = %run, "worker connected");

    let worker = Worker::new(rank, Box::new(channel), kernels, backend);
    worker.run().await?;

    info!(rank, "worker finished");
    Ok(())
}
