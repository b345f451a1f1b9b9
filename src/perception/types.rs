use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::SeraphineError;

/// Serialize/deserialize an identifier through its `Display` / `FromStr`
/// string form. Ids are typed in memory and only become strings on the wire.
macro_rules! impl_string_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use impl_string_serde;

// ── Geometry ────────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in screenshot pixels, serialized as
/// `[x_min, y_min, x_max, y_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl From<[f64; 4]> for BBox {
    fn from([x_min, y_min, x_max, y_max]: [f64; 4]) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x_min, b.y_min, b.x_max, b.y_max]
    }
}

impl BBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center_x(&self) -> f64 {
        (self.x_min + self.x_max) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.y_min + self.y_max) / 2.0
    }

    /// Finite coordinates and strictly positive extent on both axes.
    pub fn is_valid(&self) -> bool {
        let finite = [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite());
        finite && self.x_max > self.x_min && self.y_max > self.y_min
    }

    pub fn intersection_area(&self, other: &BBox) -> f64 {
        let ix1 = self.x_min.max(other.x_min);
        let iy1 = self.y_min.max(other.y_min);
        let ix2 = self.x_max.min(other.x_max);
        let iy2 = self.y_max.min(other.y_max);
        (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Smallest rectangle enclosing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    /// Union of every rectangle; `None` for an empty iterator.
    pub fn union_all<'a, I>(boxes: I) -> Option<BBox>
    where
        I: IntoIterator<Item = &'a BBox>,
    {
        boxes
            .into_iter()
            .fold(None, |acc: Option<BBox>, b| Some(acc.map_or(*b, |a| a.union(b))))
    }
}

// ── Identifiers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorSource {
    ObjectDetector,
    TextDetector,
}

impl DetectorSource {
    fn prefix(self) -> char {
        match self {
            DetectorSource::ObjectDetector => 'Y',
            DetectorSource::TextDetector => 'O',
        }
    }
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([YOM])(\d{1,10})$").expect("id pattern is valid"))
}

/// Split `"Y012"` into `('Y', 12)`.
fn parse_prefixed(raw: &str) -> Result<(char, u32), SeraphineError> {
    let caps = id_pattern()
        .captures(raw.trim())
        .ok_or_else(|| SeraphineError::InvalidId(raw.to_string()))?;
    let prefix = caps[1].chars().next().unwrap_or_default();
    let number = caps[2]
        .parse::<u32>()
        .map_err(|_| SeraphineError::InvalidId(raw.to_string()))?;
    Ok((prefix, number))
}

/// Id of a raw detection, namespaced by the detector that produced it
/// (`Y001` object detector, `O001` text detector).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceId {
    Object(u32),
    Text(u32),
}

impl SourceId {
    pub fn new(source: DetectorSource, number: u32) -> Self {
        match source {
            DetectorSource::ObjectDetector => SourceId::Object(number),
            DetectorSource::TextDetector => SourceId::Text(number),
        }
    }

    pub fn source(&self) -> DetectorSource {
        match self {
            SourceId::Object(_) => DetectorSource::ObjectDetector,
            SourceId::Text(_) => DetectorSource::TextDetector,
        }
    }

    pub fn number(&self) -> u32 {
        match *self {
            SourceId::Object(n) | SourceId::Text(n) => n,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.source().prefix(), self.number())
    }
}

impl FromStr for SourceId {
    type Err = SeraphineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_prefixed(s)? {
            ('Y', n) => Ok(SourceId::Object(n)),
            ('O', n) => Ok(SourceId::Text(n)),
            _ => Err(SeraphineError::InvalidId(s.to_string())),
        }
    }
}

impl_string_serde!(SourceId);

/// Id of a merged detection (`M001`), sequential in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MergedId(pub u32);

impl fmt::Display for MergedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{:03}", self.0)
    }
}

impl FromStr for MergedId {
    type Err = SeraphineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_prefixed(s)? {
            ('M', n) => Ok(MergedId(n)),
            _ => Err(SeraphineError::InvalidId(s.to_string())),
        }
    }
}

impl_string_serde!(MergedId);

// ── Records ─────────────────────────────────────────────────────────────────

/// What an external detector hands over, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: BBox,
    /// Text detectors may omit a score.
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub text: Option<String>,
}

impl RawDetection {
    pub fn new(bbox: BBox) -> Self {
        Self { bbox, confidence: None, text: None }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// One candidate UI element from a single detector. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: SourceId,
    pub source: DetectorSource,
    pub bbox: BBox,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// An object box matched with a text box.
    Matched,
    ObjectOnly,
    TextOnly,
}

/// One retained element after de-duplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDetection {
    pub id: MergedId,
    pub bbox: BBox,
    /// Object id first when both detectors contributed.
    pub origin_ids: Vec<SourceId>,
    pub text: Option<String>,
    pub confidence: f32,
    pub kind: MergeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_nested_corner_box() {
        let a = BBox::new(0.0, 0.0, 100.0, 100.0);
        let b = BBox::new(80.0, 80.0, 100.0, 100.0);
        assert!((a.iou(&b) - 0.04).abs() < 1e-12);
        assert_eq!(a.iou(&BBox::new(200.0, 200.0, 210.0, 210.0)), 0.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn union_all_encloses_everything() {
        let boxes = [
            BBox::new(10.0, 20.0, 30.0, 40.0),
            BBox::new(5.0, 25.0, 15.0, 50.0),
            BBox::new(12.0, 18.0, 60.0, 22.0),
        ];
        assert_eq!(BBox::union_all(&boxes), Some(BBox::new(5.0, 18.0, 60.0, 50.0)));
        assert_eq!(BBox::union_all(&[]), None);
    }

    #[test]
    fn validity_rejects_degenerate_and_nan() {
        assert!(BBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
        assert!(!BBox::new(0.0, 0.0, 0.0, 10.0).is_valid());
        assert!(!BBox::new(5.0, 0.0, 1.0, 10.0).is_valid());
        assert!(!BBox::new(f64::NAN, 0.0, 1.0, 10.0).is_valid());
    }

    #[test]
    fn ids_render_with_namespace_prefix() {
        assert_eq!(SourceId::Object(7).to_string(), "Y007");
        assert_eq!(SourceId::Text(12).to_string(), "O012");
        assert_eq!(MergedId(1234).to_string(), "M1234");
    }

    #[test]
    fn ids_parse_only_in_their_namespace() {
        assert_eq!("Y003".parse::<SourceId>().unwrap(), SourceId::Object(3));
        assert_eq!("O010".parse::<SourceId>().unwrap(), SourceId::Text(10));
        assert_eq!("M002".parse::<MergedId>().unwrap(), MergedId(2));
        assert!("M002".parse::<SourceId>().is_err());
        assert!("Y002".parse::<MergedId>().is_err());
        assert!("Yabc".parse::<SourceId>().is_err());
    }

    #[test]
    fn largest_ids_survive_display_and_parse() {
        let id = MergedId(u32::MAX);
        assert_eq!(id.to_string(), "M4294967295");
        assert_eq!(id.to_string().parse::<MergedId>().unwrap(), id);
        let id = SourceId::Object(1_000_000_000);
        assert_eq!(id.to_string().parse::<SourceId>().unwrap(), id);
        assert!("M4294967296".parse::<MergedId>().is_err());
    }

    #[test]
    fn bbox_and_ids_serialize_as_wire_format() {
        let det = Detection {
            id: SourceId::Text(1),
            source: DetectorSource::TextDetector,
            bbox: BBox::new(1.0, 2.0, 3.0, 4.0),
            confidence: 1.0,
            text: Some("OK".into()),
        };
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["id"], "O001");
        assert_eq!(json["source"], "text_detector");
        assert_eq!(json["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));

        let back: Detection = serde_json::from_value(json).unwrap();
        assert_eq!(back, det);
    }

    #[test]
    fn raw_detection_defaults_optional_fields() {
        let raw: RawDetection = serde_json::from_str(r#"{"bbox":[0,0,10,10]}"#).unwrap();
        assert_eq!(raw.confidence, None);
        assert_eq!(raw.text, None);
    }
}
