//! Image loading, conversion and padding helpers for the roadseg pipeline.
//!
//! All image tensors are channel-last: `[H, W, C]` for a single image and
//! `[N, H, W, C]` for a batch.

pub mod files;
pub mod image;
pub mod padding;

pub use files::{is_supported_image_format, list_image_files};
pub use self::image::{ColorMode, ImageError, ImageResult, ImageUtils};
pub use padding::{pad_reflect, reflect_index};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
