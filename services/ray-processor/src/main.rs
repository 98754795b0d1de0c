//! Dual-pol ray processor.
//!
//! Reads radar volumes as JSON, runs every ray through the ray engine and
//! writes the derived output rays as a JSON report.

mod report;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use radar_common::Volume;
use ray_engine::{EngineConfig, RayDispatcher};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use report::VolumeReport;

#[derive(Parser, Debug)]
#[command(name = "ray-processor")]
#[command(about = "Per-ray dual-polarization computation engine")]
struct Args {
    /// Engine configuration file (YAML); built-in defaults when absent
    #[arg(short, long, env = "RAY_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Input volume files (JSON), processed in order
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output report file; stdout when absent
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of worker threads (overrides config and environment)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Write Prometheus metrics text here after the run
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(workers) = args.workers {
        config.n_workers = workers;
    }
    config.check()?;
    Ok(config)
}

async fn read_volume(path: &Path) -> Result<Volume> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading volume {}", path.display()))?;
    Volume::from_json(&text).with_context(|| format!("parsing volume {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let config = load_config(&args)?;
    info!(
        workers = config.n_workers,
        output_fields = config.output_fields.len(),
        profile_source = ?config.profile.source,
        "Loaded configuration"
    );

    let mut volumes = Vec::with_capacity(args.input.len());
    for path in &args.input {
        let volume = read_volume(path).await?;
        info!(
            path = %path.display(),
            start = %volume.start_time,
            rays = volume.rays.len(),
            "Read volume"
        );
        volumes.push(volume);
    }

    let start = Instant::now();
    let reports = tokio::task::spawn_blocking(move || -> Result<Vec<VolumeReport>> {
        let mut dispatcher = RayDispatcher::new(config)?;
        let assemblers = dispatcher.run_volumes(&volumes)?;
        let config = dispatcher.config();
        Ok(volumes
            .iter()
            .zip(assemblers)
            .map(|(volume, assembler)| VolumeReport::new(volume, assembler, config))
            .collect())
    })
    .await??;

    let harvested: usize = reports.iter().map(|r| r.harvested).sum();
    let failed: usize = reports.iter().map(|r| r.failed).sum();
    info!(
        volumes = reports.len(),
        harvested,
        failed,
        duration_ms = start.elapsed().as_millis(),
        "Processing complete"
    );

    let json = serde_json::to_vec_pretty(&reports)?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "Wrote report");
        }
        None => {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&json).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    if let Some(path) = &args.metrics_file {
        tokio::fs::write(path, prometheus_handle.render())
            .await
            .with_context(|| format!("writing {}", path.display()))?;
    }

    Ok(())
}
