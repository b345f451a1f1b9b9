use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::SeraphineResult;
use crate::perception::group_crop::GroupCrop;
use crate::perception::layout::{GroupId, GroupLayout};
use crate::perception::types::{DetectorSource, RawDetection};

/// A black-box producer of bounding boxes for one screenshot.
/// The object detector and the text detector are both implementations.
#[async_trait]
pub trait Detector: Send + Sync {
    fn source(&self) -> DetectorSource;

    async fn detect(&self, image_bytes: &[u8]) -> SeraphineResult<Vec<RawDetection>>;
}

/// Everything the labeling step gets to see.
pub struct LabelRequest<'a> {
    pub layout: &'a GroupLayout,
    /// One crop per group, empty when crops are disabled or the image
    /// could not be decoded.
    pub crops: &'a [GroupCrop],
}

/// Downstream consumer that names groups. It may only return annotations;
/// group identity, bbox and membership stay untouched.
#[async_trait]
pub trait GroupLabeler: Send + Sync {
    async fn label(&self, request: LabelRequest<'_>) -> SeraphineResult<BTreeMap<GroupId, String>>;
}
