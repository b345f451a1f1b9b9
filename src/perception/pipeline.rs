/// Layout pipeline: runs both detectors, merges their output, groups the
/// merged detections and hands the groups to an optional labeler.
///
/// 1. Object and text detectors run concurrently; merging waits for both.
/// 2. A failing detector degrades the run instead of failing it: its stream
///    is treated as empty and the other passes through as singletons.
/// 3. Merge and grouping are synchronous and pure.
/// 4. The labeler may only attach annotations; a labeler error is logged.
///
/// The whole run is bounded by `run_timeout_ms` and yields nothing on expiry.
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{PipelineConfig, RunMode};
use crate::errors::{SeraphineError, SeraphineResult};
use crate::perception::bbox_merger::{merge_detections, MergeStats};
use crate::perception::detectors::assign_ids;
use crate::perception::group_crop::{crop_groups, GroupCrop};
use crate::perception::layout::{GroupLayout, GroupingAnalysis};
use crate::perception::seraphine::group_detections;
use crate::perception::traits::{Detector, GroupLabeler, LabelRequest};
use crate::perception::types::{Detection, DetectorSource, MergedDetection};

/// Which upstream detectors failed during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedInput {
    pub object_detector_failed: bool,
    pub text_detector_failed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl DegradedInput {
    pub fn is_degraded(&self) -> bool {
        self.object_detector_failed || self.text_detector_failed
    }
}

/// Wall-clock time per stage, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub detection_ms: f64,
    pub merge_ms: f64,
    pub grouping_ms: f64,
    pub labeling_ms: f64,
    pub total_ms: f64,
}

/// Result of the pure merge + group step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedLayout {
    pub merged: Vec<MergedDetection>,
    pub merge_stats: MergeStats,
    pub layout: GroupLayout,
    pub analysis: GroupingAnalysis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    pub object_detections: Vec<Detection>,
    pub text_detections: Vec<Detection>,
    pub merged: Vec<MergedDetection>,
    pub merge_stats: MergeStats,
    pub layout: GroupLayout,
    pub analysis: GroupingAnalysis,
    pub timings: StageTimings,
    pub degraded: DegradedInput,
}

/// Merge and group one image's detections. Deterministic: identical input
/// yields identical (byte-for-byte when serialized) output.
pub fn process_detections(
    objects: &[Detection],
    texts: &[Detection],
    config: &PipelineConfig,
) -> ProcessedLayout {
    let merge = merge_detections(objects, texts, &config.merger);
    let grouping = group_detections(&merge.merged, &config.grouping);
    ProcessedLayout {
        merged: merge.merged,
        merge_stats: merge.stats,
        layout: grouping.layout,
        analysis: grouping.analysis,
    }
}

pub struct LayoutPipeline {
    config: PipelineConfig,
    object_detector: Arc<dyn Detector>,
    text_detector: Arc<dyn Detector>,
    labeler: Option<Arc<dyn GroupLabeler>>,
}

impl LayoutPipeline {
    /// Validates `config` and applies its run mode.
    pub fn new(
        mut config: PipelineConfig,
        object_detector: Arc<dyn Detector>,
        text_detector: Arc<dyn Detector>,
    ) -> SeraphineResult<Self> {
        config.apply_mode();
        config.validate()?;
        if object_detector.source() != DetectorSource::ObjectDetector {
            return Err(SeraphineError::Config(
                "object detector slot holds a text detector".into(),
            ));
        }
        if text_detector.source() != DetectorSource::TextDetector {
            return Err(SeraphineError::Config(
                "text detector slot holds an object detector".into(),
            ));
        }
        Ok(Self {
            config,
            object_detector,
            text_detector,
            labeler: None,
        })
    }

    pub fn with_labeler(mut self, labeler: Arc<dyn GroupLabeler>) -> Self {
        self.labeler = Some(labeler);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline on one screenshot.
    pub async fn run(
        &self,
        image_bytes: &[u8],
        image_name: Option<&str>,
    ) -> SeraphineResult<PipelineResult> {
        let limit_ms = self.config.run_timeout_ms;
        let limit = Duration::from_millis(limit_ms);
        match tokio::time::timeout(limit, self.run_inner(image_bytes, image_name)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    timeout_ms = limit_ms,
                    "pipeline run timed out; discarding partial results"
                );
                Err(SeraphineError::Timeout(limit_ms))
            }
        }
    }

    async fn run_inner(
        &self,
        image_bytes: &[u8],
        image_name: Option<&str>,
    ) -> SeraphineResult<PipelineResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total_start = Instant::now();
        let mut degraded = DegradedInput::default();

        // Step 1: both detectors, joined before merging.
        let stage = Instant::now();
        let (object_raw, text_raw) = tokio::join!(
            self.object_detector.detect(image_bytes),
            self.text_detector.detect(image_bytes),
        );
        let object_raw = object_raw.unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                "object detector failed; continuing with text detections only"
            );
            degraded.object_detector_failed = true;
            degraded.errors.push(format!("object detector: {e}"));
            Vec::new()
        });
        let text_raw = text_raw.unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                "text detector failed; continuing with object detections only"
            );
            degraded.text_detector_failed = true;
            degraded.errors.push(format!("text detector: {e}"));
            Vec::new()
        });
        let object_detections = assign_ids(DetectorSource::ObjectDetector, object_raw);
        let text_detections = assign_ids(DetectorSource::TextDetector, text_raw);
        let detection_ms = elapsed_ms(stage);
        tracing::debug!(
            objects = object_detections.len(),
            texts = text_detections.len(),
            "detections received"
        );

        // Step 2: merge.
        let stage = Instant::now();
        let merge = merge_detections(&object_detections, &text_detections, &self.config.merger);
        let merge_ms = elapsed_ms(stage);

        // Step 3: group.
        let stage = Instant::now();
        let grouping = group_detections(&merge.merged, &self.config.grouping);
        let grouping_ms = elapsed_ms(stage);
        let mut layout = grouping.layout;

        // Step 4: label.
        let stage = Instant::now();
        if let Some(labeler) = &self.labeler {
            self.label_groups(labeler.as_ref(), image_bytes, &mut layout).await;
        }
        let labeling_ms = elapsed_ms(stage);

        let timings = StageTimings {
            detection_ms,
            merge_ms,
            grouping_ms,
            labeling_ms,
            total_ms: elapsed_ms(total_start),
        };

        if self.config.diagnostics.enable_timing {
            tracing::info!(
                run_id = %run_id,
                detection_ms = timings.detection_ms,
                merge_ms = timings.merge_ms,
                grouping_ms = timings.grouping_ms,
                labeling_ms = timings.labeling_ms,
                total_ms = timings.total_ms,
                "pipeline stage timings"
            );
        }
        if self.config.diagnostics.enable_debug {
            for (id, group) in layout.iter() {
                tracing::debug!(group_id = %id, members = group.len(), bbox = ?group.bbox, "group");
            }
        }
        if degraded.is_degraded() {
            tracing::warn!(run_id = %run_id, ?degraded, "pipeline run completed on partial input");
        }
        if self.config.mode == RunMode::Deploy {
            tracing::info!(
                groups = grouping.analysis.total_groups,
                total_ms = timings.total_ms,
                "pipeline completed"
            );
        }

        Ok(PipelineResult {
            run_id,
            started_at,
            image_name: image_name.map(str::to_string),
            object_detections,
            text_detections,
            merged: merge.merged,
            merge_stats: merge.stats,
            layout,
            analysis: grouping.analysis,
            timings,
            degraded,
        })
    }

    async fn label_groups(
        &self,
        labeler: &dyn GroupLabeler,
        image_bytes: &[u8],
        layout: &mut GroupLayout,
    ) {
        if layout.is_empty() {
            return;
        }

        let output = &self.config.output;
        let crops: Vec<GroupCrop> = if output.generate_group_crops {
            crop_groups(image_bytes, layout, output.crop_padding_px, output.crop_min_size)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "group crops unavailable; labeling without them");
                    Vec::new()
                })
        } else {
            Vec::new()
        };

        let request = LabelRequest { layout: &*layout, crops: &crops };
        match labeler.label(request).await {
            Ok(labels) => {
                let attached = layout.attach_labels(labels);
                tracing::debug!(attached, "group labels attached");
            }
            Err(e) => {
                tracing::warn!(error = %e, "labeling failed; groups left unlabeled");
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
