//! YuE API server - Main entry point

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yue_common::config::{load_config, parse_device_list, ConfigOverrides};

use yue_api::{build_router, AppState};

/// Command-line arguments for yue-api
///
/// Every option can also be set through the environment; the command line wins.
#[derive(Parser, Debug)]
#[command(name = "yue-api")]
#[command(about = "REST front end for YuE music generation")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "YUE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// CUDA device indices, comma separated; one worker per device
    #[arg(long, env = "CUDA_IDX")]
    cuda_idx: Option<String>,

    /// Default stage-1 model
    #[arg(long, env = "STAGE1_MODEL")]
    stage1_model: Option<String>,

    /// Default stage-2 model
    #[arg(long, env = "STAGE2_MODEL")]
    stage2_model: Option<String>,

    /// Directory that receives per-job output directories
    #[arg(short, long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Inference program executable
    #[arg(long, env = "YUE_INFERENCE_PROGRAM")]
    program: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "YUE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            cuda_devices: self.cuda_idx.as_deref().map(parse_device_list),
            stage1_model: self.stage1_model.clone(),
            stage2_model: self.stage2_model.clone(),
            output_dir: self.output_dir.clone(),
            program: self.program.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loaded = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let mut config = loaded.config;
    config.apply_overrides(&args.overrides());

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("yue_api={0},yue_common={0},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting YuE API v{}", env!("CARGO_PKG_VERSION"));
    match &loaded.source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => warn!("No config file found, using compiled defaults"),
    }

    config.validate().context("Invalid configuration")?;

    tokio::fs::create_dir_all(&config.inference.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.inference.output_dir.display()
            )
        })?;

    info!(
        output_dir = %config.inference.output_dir.display(),
        program = %config.inference.program.display(),
        devices = ?config.inference.cuda_devices,
        stage1_model = %config.inference.stage1_model,
        stage2_model = %config.inference.stage2_model,
        "Inference configuration"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::new(config);
    let app = build_router(state);

    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
