use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use seraphine_lib::config::{self, RunMode};
use seraphine_lib::export::persist_artifacts;
use seraphine_lib::perception::detectors::{FileDetector, StaticDetector};
use seraphine_lib::perception::traits::Detector;
use seraphine_lib::perception::types::DetectorSource;
use seraphine_lib::{LayoutPipeline, PipelineConfig, SeraphineResult};

#[derive(Parser)]
#[command(
    name = "seraphine",
    about = "Merge object and text detections and group them into UI rows and columns"
)]
struct Cli {
    /// JSON array of object-detector boxes
    #[arg(long, value_name = "json")]
    objects: PathBuf,

    /// JSON array of text-detector boxes
    #[arg(long, value_name = "json")]
    text: Option<PathBuf>,

    /// Screenshot the detections belong to (needed for visualizations)
    #[arg(long, value_name = "png")]
    image: Option<PathBuf>,

    /// Config file; searched for when omitted
    #[arg(long, value_name = "toml")]
    config: Option<PathBuf>,

    /// Override output.output_dir
    #[arg(long, value_name = "dir")]
    output_dir: Option<PathBuf>,

    /// Override merger.merge_iou_threshold
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Debug,
    Deploy,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Debug => RunMode::Debug,
            ModeArg::Deploy => RunMode::Deploy,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    seraphine_lib::init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "seraphine failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> SeraphineResult<()> {
    let config = build_config(&cli)?;

    let object_detector: Arc<dyn Detector> =
        Arc::new(FileDetector::new(DetectorSource::ObjectDetector, &cli.objects));
    let text_detector: Arc<dyn Detector> = match &cli.text {
        Some(path) => Arc::new(FileDetector::new(DetectorSource::TextDetector, path)),
        None => Arc::new(StaticDetector::new(DetectorSource::TextDetector, Vec::new())),
    };

    let image_bytes = match &cli.image {
        Some(path) => Some(tokio::fs::read(path).await?),
        None => None,
    };
    let image_name = cli
        .image
        .as_deref()
        .or(Some(cli.objects.as_path()))
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned());

    let output = config.output.clone();
    let pipeline = LayoutPipeline::new(config, object_detector, text_detector)?;
    let result = pipeline
        .run(image_bytes.as_deref().unwrap_or_default(), image_name.as_deref())
        .await?;

    persist_artifacts(&result, image_bytes.as_deref(), &output)?;
    println!("{}", serde_json::to_string_pretty(&result.layout)?);
    Ok(())
}

/// File (or defaults), then environment, then command-line flags.
fn build_config(cli: &Cli) -> SeraphineResult<PipelineConfig> {
    let mut config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "no usable config file; using defaults");
            let mut config = PipelineConfig::default();
            config.apply_env_overrides()?;
            config
        }
    };

    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if let Some(threshold) = cli.threshold {
        config.merger.merge_iou_threshold = threshold;
    }
    if let Some(dir) = &cli.output_dir {
        config.output.output_dir = dir.clone();
    }
    config.apply_mode();
    config.validate()?;
    Ok(config)
}
