pub mod config;
pub mod errors;
pub mod export;
pub mod perception;

pub use crate::config::PipelineConfig;
pub use crate::errors::{SeraphineError, SeraphineResult};
pub use crate::perception::pipeline::{process_detections, LayoutPipeline, PipelineResult};

/// Install the global fmt subscriber. `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
