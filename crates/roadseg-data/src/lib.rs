//! # roadseg-data
//!
//! Data generation for patch-based road segmentation: reflect-padded context
//! patches for training, deterministic tiling and reassembly for inference,
//! and the directory-backed sources and augmentation that feed them.

pub mod augmentation;
pub mod batcher;
pub mod dataset;
pub mod error;
pub mod patch;
pub mod pipeline;
pub mod predict;

pub use augmentation::{AugmentationConfig, AugmentationParams, FillMode, ImageAugmentor};
pub use batcher::{PatchBatch, PatchBatcher, PatchItem};
pub use dataset::{DatasetPaths, ImageMaskSource, RoadDataset, RoadItem, TestImages};
pub use error::{DatasetError, DatasetResult, PatchError, PatchResult};
pub use patch::{
    reassemble_ordered, reassemble_tiles, Acceptance, PatchAnchor, PatchGeometry, PatchPairs,
    PatchSampler, PatchTiler, TileCoord, Tiles, DEFAULT_MAX_ATTEMPTS, ROAD_PRESENCE_THRESHOLD,
};
pub use pipeline::PatchPipeline;
pub use predict::{predict_image, CenterCropPredictor, PatchPredictor};

#[cfg(test)]
mod tests {
    pub type TestBackend = burn::backend::NdArray;
}
