/// Fuses the object-detector and text-detector streams into one
/// de-duplicated list of `MergedDetection`s.
///
/// Matching is one-to-one and greedy on IoU: every (object, text) pair at or
/// above the threshold is a candidate, candidates are committed highest IoU
/// first, and a detection already consumed by a committed pair is skipped.
/// The object rectangle represents a matched pair; the text box contributes
/// only its text.
use serde::{Deserialize, Serialize};

use crate::config::MergerConfig;
use crate::perception::types::{
    Detection, DetectorSource, MergeKind, MergedDetection, MergedId,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub total_input: usize,
    /// Malformed rectangles (or records fed to the wrong stream) that were dropped.
    pub rejected: usize,
    pub matched_pairs: usize,
    pub object_only: usize,
    pub text_only: usize,
    pub total_merged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub merged: Vec<MergedDetection>,
    pub stats: MergeStats,
}

/// A committed-or-candidate (object, text) pairing, by index into the
/// validated streams.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    iou: f64,
    object: usize,
    text: usize,
}

pub struct BBoxMerger {
    config: MergerConfig,
}

impl BBoxMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    /// Merge the two streams. Either may be empty (e.g. when a detector
    /// failed upstream); its counterpart then passes through as singletons.
    pub fn merge(&self, objects: &[Detection], texts: &[Detection]) -> MergeOutcome {
        let mut stats = MergeStats {
            total_input: objects.len() + texts.len(),
            ..Default::default()
        };

        let objects = retain_valid(objects, DetectorSource::ObjectDetector, &mut stats.rejected);
        let texts = retain_valid(texts, DetectorSource::TextDetector, &mut stats.rejected);

        let pairs = self.assign_pairs(&objects, &texts);

        let mut object_used = vec![false; objects.len()];
        let mut text_used = vec![false; texts.len()];
        let mut merged = Vec::with_capacity(objects.len() + texts.len());
        let mut next_id = 1u32;
        let mut take_id = || {
            let id = MergedId(next_id);
            next_id += 1;
            id
        };

        for pair in &pairs {
            let obj = objects[pair.object];
            let txt = texts[pair.text];
            object_used[pair.object] = true;
            text_used[pair.text] = true;
            tracing::trace!(object = %obj.id, text = %txt.id, iou = pair.iou, "pair matched");
            merged.push(MergedDetection {
                id: take_id(),
                bbox: obj.bbox,
                origin_ids: vec![obj.id, txt.id],
                text: txt.text.clone().or_else(|| obj.text.clone()),
                confidence: obj.confidence,
                kind: MergeKind::Matched,
            });
        }
        stats.matched_pairs = pairs.len();

        for (obj, _) in objects.iter().zip(&object_used).filter(|(_, used)| !**used) {
            merged.push(singleton(take_id(), obj, MergeKind::ObjectOnly));
            stats.object_only += 1;
        }
        for (txt, _) in texts.iter().zip(&text_used).filter(|(_, used)| !**used) {
            merged.push(singleton(take_id(), txt, MergeKind::TextOnly));
            stats.text_only += 1;
        }

        stats.total_merged = merged.len();
        tracing::debug!(
            input = stats.total_input,
            rejected = stats.rejected,
            matched = stats.matched_pairs,
            object_only = stats.object_only,
            text_only = stats.text_only,
            merged = stats.total_merged,
            "detections merged"
        );

        MergeOutcome { merged, stats }
    }

    /// Greedy highest-IoU-first one-to-one assignment. Returned in commit order.
    fn assign_pairs(&self, objects: &[&Detection], texts: &[&Detection]) -> Vec<Candidate> {
        let threshold = self.config.merge_iou_threshold;

        let mut candidates = Vec::new();
        for (oi, obj) in objects.iter().enumerate() {
            for (ti, txt) in texts.iter().enumerate() {
                // Disjoint boxes never match, even with a zero threshold.
                if obj.bbox.intersection_area(&txt.bbox) <= 0.0 {
                    continue;
                }
                let iou = obj.bbox.iou(&txt.bbox);
                if iou >= threshold {
                    candidates.push(Candidate { iou, object: oi, text: ti });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.iou
                .total_cmp(&a.iou)
                .then_with(|| objects[a.object].id.cmp(&objects[b.object].id))
                .then_with(|| texts[a.text].id.cmp(&texts[b.text].id))
        });

        let mut object_taken = vec![false; objects.len()];
        let mut text_taken = vec![false; texts.len()];
        let mut committed = Vec::new();
        for c in candidates {
            if object_taken[c.object] || text_taken[c.text] {
                continue;
            }
            object_taken[c.object] = true;
            text_taken[c.text] = true;
            committed.push(c);
        }
        committed
    }
}

/// Convenience wrapper over [`BBoxMerger::merge`].
pub fn merge_detections(
    objects: &[Detection],
    texts: &[Detection],
    config: &MergerConfig,
) -> MergeOutcome {
    BBoxMerger::new(config.clone()).merge(objects, texts)
}

fn retain_valid<'a>(
    detections: &'a [Detection],
    expected: DetectorSource,
    rejected: &mut usize,
) -> Vec<&'a Detection> {
    detections
        .iter()
        .filter(|d| {
            if d.source != expected || d.id.source() != expected {
                tracing::warn!(id = %d.id, ?expected, "detection from the wrong stream dropped");
                *rejected += 1;
                return false;
            }
            if !d.bbox.is_valid() {
                tracing::warn!(id = %d.id, bbox = ?d.bbox, "malformed rectangle dropped");
                *rejected += 1;
                return false;
            }
            true
        })
        .collect()
}

fn singleton(id: MergedId, det: &Detection, kind: MergeKind) -> MergedDetection {
    MergedDetection {
        id,
        bbox: det.bbox,
        origin_ids: vec![det.id],
        text: det.text.clone(),
        confidence: det.confidence,
        kind,
    }
}
