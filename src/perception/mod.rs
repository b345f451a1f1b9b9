pub mod annotator;
pub mod bbox_merger;
pub mod detectors;
pub mod group_crop;
pub mod layout;
pub mod pipeline;
pub mod seraphine;
pub mod traits;
pub mod types;
