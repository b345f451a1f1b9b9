/// Detector adapters and id assignment.
///
/// The models themselves run elsewhere; these adapters hand their boxes to
/// the pipeline through the [`Detector`] trait.
use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::{SeraphineError, SeraphineResult};
use crate::perception::traits::Detector;
use crate::perception::types::{Detection, DetectorSource, RawDetection, SourceId};

/// Stamp `Y###` / `O###` ids onto raw detections in the order they were
/// produced. Records that later fail validation still consume their number.
pub fn assign_ids(source: DetectorSource, raws: Vec<RawDetection>) -> Vec<Detection> {
    raws.into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let id = SourceId::new(source, idx as u32 + 1);
            Detection {
                id,
                source,
                bbox: raw.bbox,
                confidence: normalize_confidence(id, raw.confidence),
                text: raw.text,
            }
        })
        .collect()
}

fn normalize_confidence(id: SourceId, confidence: Option<f32>) -> f32 {
    match confidence {
        None => 1.0,
        Some(c) if c.is_nan() => {
            tracing::warn!(id = %id, "NaN confidence replaced with 1.0");
            1.0
        }
        Some(c) if !(0.0..=1.0).contains(&c) => {
            tracing::warn!(id = %id, confidence = c, "confidence clamped to [0, 1]");
            c.clamp(0.0, 1.0)
        }
        Some(c) => c,
    }
}

/// Detections already held in memory (e.g. produced by an in-process model).
pub struct StaticDetector {
    source: DetectorSource,
    detections: Vec<RawDetection>,
}

impl StaticDetector {
    pub fn new(source: DetectorSource, detections: Vec<RawDetection>) -> Self {
        Self { source, detections }
    }
}

#[async_trait]
impl Detector for StaticDetector {
    fn source(&self) -> DetectorSource {
        self.source
    }

    async fn detect(&self, _image_bytes: &[u8]) -> SeraphineResult<Vec<RawDetection>> {
        Ok(self.detections.clone())
    }
}

/// Reads a JSON array of [`RawDetection`] written by an external model run.
pub struct FileDetector {
    source: DetectorSource,
    path: PathBuf,
}

impl FileDetector {
    pub fn new(source: DetectorSource, path: impl Into<PathBuf>) -> Self {
        Self { source, path: path.into() }
    }
}

#[async_trait]
impl Detector for FileDetector {
    fn source(&self) -> DetectorSource {
        self.source
    }

    async fn detect(&self, _image_bytes: &[u8]) -> SeraphineResult<Vec<RawDetection>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SeraphineError::Detector(format!("read {}: {e}", self.path.display()))
        })?;
        let detections: Vec<RawDetection> = serde_json::from_str(&content)?;
        tracing::debug!(
            path = %self.path.display(),
            source = ?self.source,
            count = detections.len(),
            "detections loaded from file"
        );
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::BBox;

    #[test]
    fn ids_are_sequential_per_source() {
        let raws = vec![
            RawDetection::new(BBox::new(0.0, 0.0, 1.0, 1.0)).with_confidence(0.7),
            RawDetection::new(BBox::new(0.0, 0.0, 0.0, 0.0)),
            RawDetection::new(BBox::new(2.0, 2.0, 3.0, 3.0)).with_text("Save"),
        ];
        let dets = assign_ids(DetectorSource::TextDetector, raws);
        let ids: Vec<String> = dets.iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, ["O001", "O002", "O003"]);
        assert!(dets.iter().all(|d| d.source == DetectorSource::TextDetector));
        assert_eq!(dets[2].text.as_deref(), Some("Save"));
    }

    #[test]
    fn missing_confidence_defaults_and_outliers_clamp() {
        let raws = vec![
            RawDetection::new(BBox::new(0.0, 0.0, 1.0, 1.0)),
            RawDetection::new(BBox::new(0.0, 0.0, 1.0, 1.0)).with_confidence(1.7),
            RawDetection::new(BBox::new(0.0, 0.0, 1.0, 1.0)).with_confidence(-0.2),
        ];
        let dets = assign_ids(DetectorSource::ObjectDetector, raws);
        assert_eq!(dets[0].confidence, 1.0);
        assert_eq!(dets[1].confidence, 1.0);
        assert_eq!(dets[2].confidence, 0.0);
    }

    #[tokio::test]
    async fn file_detector_reads_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocr.json");
        std::fs::write(
            &path,
            r#"[{"bbox":[10,10,50,20],"text":"File"},{"bbox":[60,10,90,20],"confidence":0.4}]"#,
        )
        .unwrap();

        let detector = FileDetector::new(DetectorSource::TextDetector, &path);
        let raws = detector.detect(&[]).await.unwrap();
        assert_eq!(raws.len(), 2);
        assert_eq!(raws[0].text.as_deref(), Some("File"));
        assert_eq!(raws[1].confidence, Some(0.4));
    }

    #[tokio::test]
    async fn file_detector_missing_file_is_detector_error() {
        let detector = FileDetector::new(DetectorSource::ObjectDetector, "/no/such/yolo.json");
        let err = detector.detect(&[]).await.unwrap_err();
        assert!(matches!(err, SeraphineError::Detector(_)));
    }
}
