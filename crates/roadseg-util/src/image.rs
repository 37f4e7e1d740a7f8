//! Image <-> tensor conversion with channel-last layout.

use std::path::{Path, PathBuf};

use burn::tensor::{backend::Backend, DType, ElementConversion, Tensor, TensorData};
use image::{
    buffer::ConvertBuffer, imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Luma,
    Rgb,
};
use thiserror::Error;

/// ImageError covers all possible errors in image processing operations
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to open image at '{path}': {source}")]
    ImageLoadError {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save image at '{path}': {source}")]
    ImageSaveError {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to read directory '{}': {source}", .path.display())]
    DirectoryReadFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to convert tensor to data: {reason}")]
    TensorConversionError { reason: String },

    #[error("failed to create image buffer: {reason}")]
    BufferCreationError { reason: String },

    #[error("expected an image of rank 3 [H, W, C] or rank 4 [N, H, W, C], got rank {rank}")]
    UnsupportedRank { rank: usize },

    #[error("cannot reflect-pad an empty spatial axis {axis} by {margin}")]
    EmptySpatialAxis { axis: usize, margin: usize },

    #[error("data length mismatch: expected {expected}, got {actual}")]
    DataLengthMismatch { expected: usize, actual: usize },

    #[error("unsupported channel count: {channels} (supported: 1, 3)")]
    UnsupportedChannelCount { channels: usize },

    #[error("empty image list provided for batching")]
    EmptyImageList,

    #[error("image {index} has shape {actual:?}, expected {expected:?}")]
    InconsistentImageDimensions {
        index: usize,
        actual: [usize; 3],
        expected: [usize; 3],
    },
}

/// Result type alias for ImageError
pub type ImageResult<T> = Result<T, ImageError>;

/// Pixel layout requested when decoding a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Three channels, used for aerial photographs.
    Rgb,
    /// One channel, used for ground-truth and predicted masks.
    Grayscale,
}

impl ColorMode {
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Grayscale => 1,
        }
    }
}

/// Image processing utilities
pub struct ImageUtils;

impl ImageUtils {
    /// Decode an image file.
    pub fn open<P: AsRef<Path>>(path: P) -> ImageResult<DynamicImage> {
        image::open(&path).map_err(|source| ImageError::ImageLoadError {
            path: path.as_ref().display().to_string(),
            source,
        })
    }

    /// Load an image file and resize it to `size` x `size` before conversion.
    pub fn load_resized<B: Backend, P: AsRef<Path>>(
        path: P,
        mode: ColorMode,
        size: u32,
        filter: FilterType,
        device: &B::Device,
    ) -> ImageResult<Tensor<B, 3>> {
        let img = Self::open(path)?.resize_exact(size, size, filter);
        Self::dynamic_image_to_tensor(img, mode, device)
    }

    /// Convert a DynamicImage to a `[H, W, C]` tensor of raw 0-255 intensities.
    pub fn dynamic_image_to_tensor<B: Backend>(
        img: DynamicImage,
        mode: ColorMode,
        device: &B::Device,
    ) -> ImageResult<Tensor<B, 3>> {
        let (width, height) = img.dimensions();
        let raw = match mode {
            ColorMode::Rgb => img.into_rgb8().into_raw(),
            ColorMode::Grayscale => img.into_luma8().into_raw(),
        };

        Self::from_raw_pixels(raw, width, height, mode.channels(), false, device)
    }

    /// Create a `[H, W, C]` tensor from interleaved 8-bit pixel data.
    ///
    /// With `normalize` the bytes are scaled into `[0, 1]`.
    pub fn from_raw_pixels<B: Backend>(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: usize,
        normalize: bool,
        device: &B::Device,
    ) -> ImageResult<Tensor<B, 3>> {
        if !matches!(channels, 1 | 3) {
            return Err(ImageError::UnsupportedChannelCount { channels });
        }

        let expected_len = (width * height) as usize * channels;
        if data.len() != expected_len {
            return Err(ImageError::DataLengthMismatch {
                expected: expected_len,
                actual: data.len(),
            });
        }

        let values: Vec<f32> = if normalize {
            const INV_255: f32 = 1.0 / 255.0;
            data.into_iter().map(|byte| f32::from(byte) * INV_255).collect()
        } else {
            data.into_iter().map(f32::from).collect()
        };

        let tensor_data = TensorData::new(values, [height as usize, width as usize, channels])
            .convert::<B::FloatElem>();
        Ok(Tensor::from_data(tensor_data, device))
    }

    /// Scale intensities into `[0, 1]` when the tensor still holds 8-bit values.
    pub fn normalize_intensity<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
        let max = tensor.clone().max().into_scalar().elem::<f32>();
        if max > 1.0 {
            tensor.div_scalar(255.0)
        } else {
            tensor
        }
    }

    /// Normalize an image/mask pair.
    ///
    /// The image ends up in `[0, 1]`; the mask is normalized the same way and
    /// then binarized (`> 0.5` becomes 1, everything else 0).
    pub fn normalize_pair<B: Backend, const D: usize>(
        image: Tensor<B, D>,
        mask: Tensor<B, D>,
    ) -> (Tensor<B, D>, Tensor<B, D>) {
        let image = Self::normalize_intensity(image);
        let mask = Self::normalize_intensity(mask).greater_elem(0.5).float();
        (image, mask)
    }

    /// Stack equally sized `[H, W, C]` tensors into a `[N, H, W, C]` batch.
    pub fn stack_images<B: Backend>(images: Vec<Tensor<B, 3>>) -> ImageResult<Tensor<B, 4>> {
        let expected = images.first().ok_or(ImageError::EmptyImageList)?.dims();

        for (index, image) in images.iter().enumerate().skip(1) {
            let actual = image.dims();
            if actual != expected {
                return Err(ImageError::InconsistentImageDimensions {
                    index,
                    actual,
                    expected,
                });
            }
        }

        Ok(Tensor::stack(images, 0))
    }

    /// Convert a `[H, W, C]` tensor with values in `[0, 1]` to an 8-bit image.
    ///
    /// One channel yields a grayscale image, three channels an RGB image.
    pub fn tensor_to_dynamic_image<B: Backend>(tensor: Tensor<B, 3>) -> ImageResult<DynamicImage> {
        let [height, width, channels] = tensor.dims();

        if !matches!(channels, 1 | 3) {
            return Err(ImageError::UnsupportedChannelCount { channels });
        }

        let data = tensor
            .clamp(0.0, 1.0)
            .into_data()
            .convert_dtype(DType::F32)
            .to_vec::<f32>()
            .map_err(|e| ImageError::TensorConversionError {
                reason: format!("{e:?}"),
            })?;

        let img = if channels == 1 {
            let buffer = ImageBuffer::<Luma<f32>, _>::from_raw(width as u32, height as u32, data)
                .ok_or_else(|| ImageError::BufferCreationError {
                    reason: "Failed to create grayscale f32 image buffer".to_string(),
                })?;
            let buffer: ImageBuffer<Luma<u8>, Vec<u8>> = buffer.convert();
            DynamicImage::ImageLuma8(buffer)
        } else {
            let buffer = ImageBuffer::<Rgb<f32>, _>::from_raw(width as u32, height as u32, data)
                .ok_or_else(|| ImageError::BufferCreationError {
                    reason: "Failed to create RGB f32 image buffer".to_string(),
                })?;
            let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> = buffer.convert();
            DynamicImage::ImageRgb8(buffer)
        };

        Ok(img)
    }

    /// Save a `[H, W, C]` tensor with values in `[0, 1]` as an image file.
    pub fn save_tensor<B: Backend, P: AsRef<Path>>(tensor: Tensor<B, 3>, path: P) -> ImageResult<()> {
        let img = Self::tensor_to_dynamic_image(tensor)?;
        img.save(&path).map_err(|source| ImageError::ImageSaveError {
            path: path.as_ref().display().to_string(),
            source,
        })
    }
}
