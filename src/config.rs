use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{SeraphineError, SeraphineResult};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Persist artifacts and log diagnostics.
    #[default]
    Debug,
    /// Return results only; no files, no timing/debug output.
    Deploy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Upper bound for one whole run (detectors included).
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default)]
    pub merger: MergerConfig,
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            run_timeout_ms: default_run_timeout_ms(),
            merger: MergerConfig::default(),
            grouping: GroupingConfig::default(),
            output: OutputConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

fn default_run_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerConfig {
    /// Minimum IoU for an (object, text) pair to count as the same element.
    /// Kept low: text labels are usually much smaller than their icon.
    #[serde(default = "default_merge_iou_threshold")]
    pub merge_iou_threshold: f64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            merge_iou_threshold: default_merge_iou_threshold(),
        }
    }
}

fn default_merge_iou_threshold() -> f64 {
    0.05
}

/// Tolerance parameters for the row/column sweep. Every tolerance is
/// `max(mean_extent * ratio, min_tolerance_px)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Row band half-width as a fraction of the bucket's mean height.
    #[serde(default = "default_row_band_ratio")]
    pub row_band_ratio: f64,
    /// Horizontal gap (fraction of mean member width) that splits a row.
    #[serde(default = "default_column_gap_ratio")]
    pub column_gap_ratio: f64,
    /// Column band half-width as a fraction of the bucket's mean width.
    #[serde(default = "default_column_band_ratio")]
    pub column_band_ratio: f64,
    /// Vertical gap (fraction of mean member height) that splits a column.
    #[serde(default = "default_vertical_gap_ratio")]
    pub vertical_gap_ratio: f64,
    #[serde(default = "default_min_tolerance_px")]
    pub min_tolerance_px: f64,
    #[serde(default = "default_true")]
    pub enable_vertical_groups: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            row_band_ratio: default_row_band_ratio(),
            column_gap_ratio: default_column_gap_ratio(),
            column_band_ratio: default_column_band_ratio(),
            vertical_gap_ratio: default_vertical_gap_ratio(),
            min_tolerance_px: default_min_tolerance_px(),
            enable_vertical_groups: true,
        }
    }
}

fn default_row_band_ratio() -> f64 {
    0.5
}

fn default_column_gap_ratio() -> f64 {
    2.0
}

fn default_column_band_ratio() -> f64 {
    0.5
}

fn default_vertical_gap_ratio() -> f64 {
    1.5
}

fn default_min_tolerance_px() -> f64 {
    4.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub save_json: bool,
    #[serde(default)]
    pub save_visualizations: bool,
    /// Crop each group out of the screenshot for the labeling step.
    #[serde(default = "default_true")]
    pub generate_group_crops: bool,
    #[serde(default = "default_crop_padding_px")]
    pub crop_padding_px: u32,
    #[serde(default = "default_crop_min_size")]
    pub crop_min_size: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            save_json: true,
            save_visualizations: false,
            generate_group_crops: true,
            crop_padding_px: default_crop_padding_px(),
            crop_min_size: default_crop_min_size(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_crop_padding_px() -> u32 {
    8
}

fn default_crop_min_size() -> u32 {
    64
}

/// Diagnostic flags only change logging, never algorithm output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_true")]
    pub enable_timing: bool,
    #[serde(default)]
    pub enable_debug: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enable_timing: true,
            enable_debug: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Parse and validate. The run mode is not applied here, so later
    /// layers (environment, command line) can still change it.
    pub fn from_toml_str(content: &str) -> SeraphineResult<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Deploy mode switches off every artifact and diagnostic output.
    /// Call once, after every override layer has been merged.
    pub fn apply_mode(&mut self) {
        if self.mode == RunMode::Deploy {
            self.output.save_json = false;
            self.output.save_visualizations = false;
            self.diagnostics.enable_debug = false;
            self.diagnostics.enable_timing = false;
        }
    }

    /// Apply `SERAPHINE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> SeraphineResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> SeraphineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("SERAPHINE_MERGE_IOU_THRESHOLD") {
            let value: f64 = raw.trim().parse().map_err(|_| {
                SeraphineError::Config(format!(
                    "SERAPHINE_MERGE_IOU_THRESHOLD is not a number: {raw:?}"
                ))
            })?;
            tracing::debug!(value, "merge_iou_threshold overridden from environment");
            self.merger.merge_iou_threshold = value;
        }
        if let Some(dir) = lookup("SERAPHINE_OUTPUT_DIR") {
            tracing::debug!(dir = %dir, "output_dir overridden from environment");
            self.output.output_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    pub fn validate(&self) -> SeraphineResult<()> {
        let threshold = self.merger.merge_iou_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SeraphineError::Config(format!(
                "merge_iou_threshold must be within [0, 1], got {threshold}"
            )));
        }

        let g = &self.grouping;
        let ratios = [
            ("row_band_ratio", g.row_band_ratio),
            ("column_gap_ratio", g.column_gap_ratio),
            ("column_band_ratio", g.column_band_ratio),
            ("vertical_gap_ratio", g.vertical_gap_ratio),
            ("min_tolerance_px", g.min_tolerance_px),
        ];
        for (name, value) in ratios {
            if !value.is_finite() || value < 0.0 {
                return Err(SeraphineError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.run_timeout_ms == 0 {
            return Err(SeraphineError::Config("run_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> SeraphineResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(SeraphineError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE_NAME);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let candidate = config_dir.join("seraphine").join(CONFIG_FILE_NAME);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(SeraphineError::Config(
        "config.toml not found next to executable, in working directory or user config dir".into(),
    ))
}

pub fn load_config(explicit: Option<&Path>) -> SeraphineResult<PipelineConfig> {
    let path = resolve_config_path(explicit)?;
    let content = std::fs::read_to_string(&path)?;
    let mut config = PipelineConfig::from_toml_str(&content)?;
    config.apply_env_overrides()?;
    tracing::info!(
        path = %path.display(),
        mode = ?config.mode,
        merge_iou_threshold = config.merger.merge_iou_threshold,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &PipelineConfig, path: &Path) -> SeraphineResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
