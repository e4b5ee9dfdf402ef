use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use snapgrid_core::backend::InferenceBackend;
use snapgrid_core::catalog::ModelCatalog;
use snapgrid_core::config::{
    config_path, data_dir, initialize_data_dir, resolve_relative_to, AppConfig,
};
use snapgrid_core::logging::{self, FileSinkPlan, LoggingInitOptions, DEFAULT_LOG_FILTER};
use snapgrid_core::registry::{OrtModelLoader, TierRegistry};
use snapgrid_core::types::{EnhancementTier, SourceImage};
use snapgrid_core::worker::{spawn_worker, WorkerCommand, WorkerEvent};

#[derive(Parser)]
#[command(name = "snapgrid", about = "Tiled AI photo upscaler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale a photo with a super-resolution model
    Upscale(UpscaleArgs),
    /// Inspect and fetch model weights
    Models(ModelsArgs),
}

#[derive(Args)]
struct UpscaleArgs {
    #[arg(help = "Input image (PNG or JPEG)")]
    input: PathBuf,
    #[arg(short = 'o', long, help = "Output PNG path (default: <input>_<tier>.png)")]
    output: Option<PathBuf>,
    #[arg(short = 't', long, default_value = "2x", help = "Enhancement tier: 2x or 4x")]
    tier: String,
    #[arg(long, help = "Inference backend: cuda or cpu (default from config)")]
    backend: Option<String>,
    #[arg(long, help = "Override valid tile size in source pixels")]
    tile_size: Option<u32>,
    #[arg(long, help = "Override tile context padding in source pixels")]
    pad: Option<u32>,
}

#[derive(Args)]
struct ModelsArgs {
    #[command(subcommand)]
    command: ModelsCommand,
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List catalog entries and their download state
    List,
    /// Download the weights for a tier ahead of first use
    Fetch {
        #[arg(help = "Enhancement tier: 2x or 4x")]
        tier: String,
    },
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(resolved_data_dir.as_path());

    if let Err(e) = initialize_data_dir(&resolved_data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    let cfg_path = config_path(&resolved_data_dir);
    let config = match AppConfig::load_from_path(&cfg_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    };

    match cli.command {
        Commands::Upscale(args) => run_upscale_command(args, &config, &resolved_data_dir).await,
        Commands::Models(args) => run_models_command(args.command, &config, &resolved_data_dir),
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let init_options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let env_filter = parse_env_filter_with_fallback(&init_plan.filter);

    match init_plan.file_sink {
        FileSinkPlan::Ready(ready) => {
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(env_filter),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(parse_env_filter_with_fallback(&init_plan.filter)),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            let attempted_log_dir = fallback
                .attempted_log_dir
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            warn!(
                attempted_log_dir = %attempted_log_dir,
                reason = %fallback.reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        pid = std::process::id(),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

fn build_catalog(config: &AppConfig, data_dir: &Path) -> ModelCatalog {
    let models_dir = resolve_relative_to(data_dir, &config.paths.models_dir);
    ModelCatalog::with_builtin_models(models_dir).with_connect_timeout(
        std::time::Duration::from_secs(config.upscale.model_load_timeout_secs),
    )
}

async fn run_upscale_command(
    args: UpscaleArgs,
    config: &AppConfig,
    data_dir: &Path,
) -> Result<()> {
    let tier = EnhancementTier::from_str(&args.tier)?;
    let backend = args
        .backend
        .as_deref()
        .map(InferenceBackend::from_str_lossy)
        .unwrap_or_else(|| config.inference.backend());

    let source = load_source_image(&args.input)?;
    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.input, tier));

    let mut options = config.upscale.pipeline_options_for(tier);
    if let Some(tile_size) = args.tile_size {
        options.tile_size = tile_size;
    }
    if let Some(pad) = args.pad {
        options.pad = pad;
    }

    let catalog = build_catalog(config, data_dir);
    let registry = TierRegistry::new(Box::new(OrtModelLoader::new(catalog, backend)));
    let mut worker = spawn_worker(registry);

    info!(
        input = %args.input.display(),
        output = %output_path.display(),
        %tier,
        %backend,
        tile_size = options.tile_size,
        pad = options.pad,
        "Upscaling photo"
    );
    let started = Instant::now();

    worker.send(WorkerCommand::Prepare { tier })?;
    match worker.recv().await.context("worker stopped unexpectedly")? {
        WorkerEvent::Ready { .. } => {}
        WorkerEvent::PrepareFailed { error, .. } => {
            worker.shutdown().await;
            return Err(error.into());
        }
        other => bail!("unexpected worker event during prepare: {other:?}"),
    }

    let job_id = Uuid::new_v4();
    worker.send(WorkerCommand::Upscale {
        job_id,
        tier,
        source,
        options,
    })?;

    let image = loop {
        match worker.recv().await.context("worker stopped unexpectedly")? {
            WorkerEvent::Progress {
                percent, message, ..
            } => {
                info!(percent, "{message}");
            }
            WorkerEvent::Complete { image, .. } => break image,
            WorkerEvent::Failed { error, .. } => {
                worker.shutdown().await;
                return Err(error.into());
            }
            WorkerEvent::Cancelled { .. } => {
                worker.shutdown().await;
                bail!("upscale was cancelled");
            }
            other => bail!("unexpected worker event during upscale: {other:?}"),
        }
    };
    worker.shutdown().await;

    let (out_w, out_h) = (image.width(), image.height());
    save_output_image(&output_path, image.into_raw(), out_w, out_h)?;
    info!(
        output = %output_path.display(),
        out_w,
        out_h,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Upscale finished"
    );
    println!("{}", output_path.display());
    Ok(())
}

fn run_models_command(command: ModelsCommand, config: &AppConfig, data_dir: &Path) -> Result<()> {
    let catalog = build_catalog(config, data_dir);
    match command {
        ModelsCommand::List => {
            for entry in catalog.list() {
                let state = if catalog.is_downloaded(entry.tier) {
                    "downloaded"
                } else {
                    "not downloaded"
                };
                println!(
                    "{}  {}  x{}  {}  ({state})",
                    entry.tier, entry.name, entry.scale, entry.description
                );
            }
            Ok(())
        }
        ModelsCommand::Fetch { tier } => {
            let tier = EnhancementTier::from_str(&tier)?;
            let path = catalog.resolve(tier)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn load_source_image(path: &Path) -> Result<SourceImage> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to open input image: {}", path.display()))?
        .into_rgba8();
    let (width, height) = decoded.dimensions();
    info!(input = %path.display(), width, height, "Decoded source image");
    Ok(SourceImage::new(decoded.into_raw(), width, height)?)
}

fn save_output_image(path: &Path, raw: Vec<u8>, width: u32, height: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create output directory: {}", parent.display())
            })?;
        }
    }
    let buffer = image::RgbaImage::from_raw(width, height, raw)
        .context("output buffer does not match its dimensions")?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write output image: {}", path.display()))?;
    Ok(())
}

fn default_output_path(input: &Path, tier: EnhancementTier) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upscaled".to_string());
    input.with_file_name(format!("{stem}_{tier}.png"))
}
