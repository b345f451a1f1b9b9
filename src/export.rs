use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::config::OutputConfig;
use crate::errors::SeraphineResult;
use crate::perception::annotator::annotate_layout;
use crate::perception::pipeline::PipelineResult;

/// `base/YYYY/MM/DD/<session_id>/`, created if missing.
pub fn output_folder(base: &Path, session_id: &str) -> SeraphineResult<PathBuf> {
    output_folder_on(base, session_id, chrono::Local::now().date_naive())
}

fn output_folder_on(base: &Path, session_id: &str, date: NaiveDate) -> SeraphineResult<PathBuf> {
    let dir = base
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
        .join(session_id);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// File stem for a run's artifacts: the image's stem, or the run id when the
/// image was not named.
fn artifact_stem(result: &PipelineResult) -> String {
    result
        .image_name
        .as_deref()
        .and_then(|name| Path::new(name).file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| result.run_id.to_string())
}

/// Write the group mapping (`group_id -> {bbox, member_ids}`).
pub fn save_layout_json(result: &PipelineResult, dir: &Path) -> SeraphineResult<PathBuf> {
    let path = dir.join(format!("{}_layout.json", artifact_stem(result)));
    std::fs::write(&path, serde_json::to_string_pretty(&result.layout)?)?;
    tracing::debug!(path = %path.display(), groups = result.layout.len(), "layout saved");
    Ok(path)
}

/// Write the whole run: detections, merge stats, layout, timings.
pub fn save_pipeline_json(result: &PipelineResult, dir: &Path) -> SeraphineResult<PathBuf> {
    let path = dir.join(format!("{}_pipeline.json", artifact_stem(result)));
    std::fs::write(&path, serde_json::to_string_pretty(result)?)?;
    tracing::debug!(path = %path.display(), "pipeline result saved");
    Ok(path)
}

pub fn save_visualization(
    result: &PipelineResult,
    image_bytes: &[u8],
    dir: &Path,
) -> SeraphineResult<PathBuf> {
    let png = annotate_layout(image_bytes, &result.merged, &result.layout)?;
    let path = dir.join(format!("{}_groups.png", artifact_stem(result)));
    std::fs::write(&path, png)?;
    tracing::debug!(path = %path.display(), "visualization saved");
    Ok(path)
}

/// Save whatever `output` asks for into a dated folder for this run.
/// A visualization that cannot be drawn is skipped with a warning.
pub fn persist_artifacts(
    result: &PipelineResult,
    image_bytes: Option<&[u8]>,
    output: &OutputConfig,
) -> SeraphineResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    if !output.save_json && !output.save_visualizations {
        return Ok(written);
    }

    let dir = output_folder(&output.output_dir, &result.run_id.to_string())?;
    if output.save_json {
        written.push(save_layout_json(result, &dir)?);
        written.push(save_pipeline_json(result, &dir)?);
    }
    if output.save_visualizations {
        match image_bytes {
            Some(bytes) => match save_visualization(result, bytes, &dir) {
                Ok(path) => written.push(path),
                Err(e) => tracing::warn!(error = %e, "visualization skipped"),
            },
            None => tracing::warn!("visualization requested but no image was given"),
        }
    }

    tracing::info!(dir = %dir.display(), files = written.len(), "artifacts saved");
    Ok(written)
}
