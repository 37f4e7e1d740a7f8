//! Error types for the roadseg-data crate.
//!
//! Patch geometry problems are reported through [`PatchError`]; everything
//! that touches the filesystem goes through [`DatasetError`].

use std::path::PathBuf;

use roadseg_util::ImageError;
use thiserror::Error;

/// Errors raised while sampling, tiling or reassembling patches.
///
/// Most of these are configuration errors: they are not retried and should
/// surface to the user unchanged.
#[derive(Error, Debug)]
pub enum PatchError {
    /// Patch size of zero.
    #[error("patch size must be positive, got {patch_size}")]
    InvalidPatchSize { patch_size: usize },

    /// Probability outside `[0, 1]`.
    #[error("skip probability must lie in [0, 1], got {value}")]
    InvalidProbability { value: f64 },

    /// The image and mask batches do not line up.
    #[error("image batch {images:?} does not match mask batch {masks:?}")]
    ShapeMismatch { images: [usize; 4], masks: [usize; 4] },

    /// No anchor fits: the patch is larger than the image.
    #[error("patch size {patch_size} exceeds the {height}x{width} sampling area")]
    PatchExceedsImage {
        patch_size: usize,
        height: usize,
        width: usize,
    },

    /// The rejection loop gave up on one image of the batch.
    #[error("no acceptable patch for image {image} after {attempts} attempts")]
    SamplingExhausted { image: usize, attempts: usize },

    /// The image cannot be cut into whole square tiles.
    #[error("a {height}x{width} image cannot be tiled into {patch_size}x{patch_size} patches")]
    NotTileable {
        height: usize,
        width: usize,
        patch_size: usize,
    },

    /// Flat results do not contain one tile per grid cell.
    #[error("expected {expected} tiles, got {actual}")]
    TileCountMismatch { expected: usize, actual: usize },

    /// A prediction tile has the wrong side length.
    #[error("expected {expected}x{expected} tiles, got {actual:?}")]
    TileShapeMismatch { expected: usize, actual: Vec<usize> },

    /// A tile coordinate lies outside the reassembly grid.
    #[error("tile ({image}, {row}, {col}) is outside a {num_images}x{dim}x{dim} grid")]
    TileOutOfRange {
        image: usize,
        row: usize,
        col: usize,
        num_images: usize,
        dim: usize,
    },

    /// Two tiles claim the same grid cell.
    #[error("tile ({image}, {row}, {col}) was provided twice")]
    DuplicateTile { image: usize, row: usize, col: usize },

    /// A grid cell received no tile.
    #[error("tile ({image}, {row}, {col}) is missing")]
    MissingTile { image: usize, row: usize, col: usize },

    /// Nothing to sample from or reassemble.
    #[error("at least one image is required")]
    NoImages,

    /// Padding the source image failed.
    #[error(transparent)]
    Padding(#[from] ImageError),
}

/// A specialized `Result` type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Error type for dataset operations.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Error when the image directory is not found.
    #[error("Image directory not found: {path}")]
    ImageDirectoryNotFound {
        /// The expected image directory path.
        path: PathBuf,
    },

    /// Error when the mask directory is not found.
    #[error("Mask directory not found: {path}")]
    MaskDirectoryNotFound {
        /// The expected mask directory path.
        path: PathBuf,
    },

    /// Error when no valid image/mask pairs are found in the dataset.
    #[error("No valid image/mask pairs found in: {path}")]
    NoValidPairs {
        /// The directory where no pairs were found.
        path: PathBuf,
    },

    /// Error when a directory holds no test images.
    #[error("No images found in: {path}")]
    NoTestImages { path: PathBuf },

    /// Error when a file has no stem (filename without extension).
    #[error("File has no stem: {path}")]
    NoFileStem {
        /// The file path without a stem.
        path: PathBuf,
    },

    /// Error when path components contain invalid UTF-8.
    #[error("Path contains invalid UTF-8: {path}")]
    InvalidUtf8Path {
        /// The path with invalid UTF-8.
        path: PathBuf,
    },

    /// Fill mode name not recognised.
    #[error("Unknown fill mode '{0}' (expected reflect, nearest or constant)")]
    UnknownFillMode(String),

    /// Pair index beyond the end of the dataset.
    #[error("Index {index} is out of range for a dataset of {len} pairs")]
    IndexOutOfRange { index: usize, len: usize },

    /// Batch size of zero.
    #[error("Batch size must be positive")]
    InvalidBatchSize,

    /// Loading or converting an image failed.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Patch extraction failed.
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
