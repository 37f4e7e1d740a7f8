//! Random geometric and photometric augmentation of image/mask pairs.
//!
//! Each call draws one set of parameters and applies the same geometric
//! transform to the image and its mask, so the ground truth stays aligned:
//!
//! 1. Affine warp: rotation, width/height shift, shear and zoom about the
//!    image centre. Pixels that map outside the source are filled according
//!    to [`FillMode`].
//! 2. Horizontal and vertical flips, each with 50% probability.
//! 3. Brightness scaling (image only).
//!
//! The image is resampled bilinearly, the mask with nearest neighbour so it
//! stays binary.

use std::str::FromStr;

use image::{DynamicImage, GenericImageView, GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_with, Interpolation};
use rand::Rng;

use crate::error::DatasetError;

/// How to fill pixels that the warp maps outside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Mirror the image across its border.
    Reflect,
    /// Repeat the closest border pixel.
    Nearest,
    /// Leave them black.
    Constant,
}

impl FromStr for FillMode {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reflect" => Ok(Self::Reflect),
            "nearest" => Ok(Self::Nearest),
            "constant" => Ok(Self::Constant),
            _ => Err(DatasetError::UnknownFillMode(s.to_string())),
        }
    }
}

impl FillMode {
    /// Fold a source coordinate onto `[0, len - 1]`, or return it unchanged
    /// for [`FillMode::Constant`].
    fn wrap(self, position: f32, len: u32) -> f32 {
        // Bilinear sampling reads one pixel to the right/below, keep clear of the edge.
        let last = len.saturating_sub(1) as f32;
        let limit = (last - 1e-3).max(0.0);
        match self {
            Self::Constant => position,
            Self::Nearest => position.clamp(0.0, limit),
            Self::Reflect => {
                if last <= 0.0 {
                    return 0.0;
                }
                let period = 2.0 * last;
                let folded = position.rem_euclid(period);
                let mirrored = if folded <= last { folded } else { period - folded };
                mirrored.min(limit)
            }
        }
    }
}

/// Data augmentation configuration parameters
#[derive(Debug, Clone)]
pub struct AugmentationConfig {
    /// Rotation drawn uniformly from `[-range, range]` degrees.
    pub rotation_range: f32,
    /// Horizontal shift as a fraction of the width.
    pub width_shift_range: f32,
    /// Vertical shift as a fraction of the height.
    pub height_shift_range: f32,
    /// Shear angle drawn uniformly from `[-range, range]` degrees.
    pub shear_range: f32,
    /// Independent zoom factors for both axes drawn from this interval.
    pub zoom_range: (f32, f32),
    /// Brightness multiplier interval, `None` to keep brightness.
    pub brightness_range: Option<(f32, f32)>,
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub fill_mode: FillMode,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 360.0,
            width_shift_range: 0.05,
            height_shift_range: 0.05,
            shear_range: 0.05,
            zoom_range: (0.95, 1.05),
            brightness_range: Some((1.0, 1.2)),
            horizontal_flip: true,
            vertical_flip: true,
            fill_mode: FillMode::Reflect,
        }
    }
}

impl AugmentationConfig {
    /// Configuration that leaves every pair untouched.
    pub const fn identity() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: (1.0, 1.0),
            brightness_range: None,
            horizontal_flip: false,
            vertical_flip: false,
            fill_mode: FillMode::Reflect,
        }
    }
}

/// One concrete draw of augmentation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentationParams {
    pub rotation_degrees: f32,
    /// Shift in pixels.
    pub shift_x: f32,
    /// Shift in pixels.
    pub shift_y: f32,
    pub shear_degrees: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub brightness: Option<f32>,
}

impl AugmentationParams {
    pub const fn identity() -> Self {
        Self {
            rotation_degrees: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            shear_degrees: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip_horizontal: false,
            flip_vertical: false,
            brightness: None,
        }
    }

    /// Mapping from output pixel coordinates to source coordinates for an
    /// image of the given size.
    fn source_transform(&self, width: u32, height: u32) -> Affine {
        let (sin, cos) = self.rotation_degrees.to_radians().sin_cos();
        let rotation = Affine([cos, -sin, 0.0, sin, cos, 0.0]);
        let shift = Affine([1.0, 0.0, self.shift_x, 0.0, 1.0, self.shift_y]);
        let shear_radians = self.shear_degrees.to_radians();
        let shear = Affine([1.0, -shear_radians.sin(), 0.0, 0.0, shear_radians.cos(), 0.0]);
        let zoom = Affine([self.zoom_x, 0.0, 0.0, 0.0, self.zoom_y, 0.0]);

        let cx = width as f32 / 2.0 - 0.5;
        let cy = height as f32 / 2.0 - 0.5;
        let to_center = Affine([1.0, 0.0, -cx, 0.0, 1.0, -cy]);
        let from_center = Affine([1.0, 0.0, cx, 0.0, 1.0, cy]);

        from_center
            .compose(&rotation)
            .compose(&shift)
            .compose(&shear)
            .compose(&zoom)
            .compose(&to_center)
    }
}

/// Row-major 2x3 affine matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine([f32; 6]);

impl Affine {
    /// `self * other`: applies `other` first.
    fn compose(&self, other: &Self) -> Self {
        let [a, b, c, d, e, f] = self.0;
        let [g, h, i, j, k, l] = other.0;
        Self([
            a * g + b * j,
            a * h + b * k,
            a * i + b * l + c,
            d * g + e * j,
            d * h + e * k,
            d * i + e * l + f,
        ])
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + b * y + c, d * x + e * y + f)
    }

    fn is_identity(&self) -> bool {
        const EPS: f32 = 1e-6;
        let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        self.0
            .iter()
            .zip(identity)
            .all(|(value, expected)| (value - expected).abs() < EPS)
    }
}

/// Applies random augmentation to image/mask pairs.
#[derive(Debug, Clone)]
pub struct ImageAugmentor {
    config: AugmentationConfig,
}

impl ImageAugmentor {
    pub const fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw parameters for an image of the given size.
    pub fn sample_params<R: Rng + ?Sized>(
        &self,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> AugmentationParams {
        let config = &self.config;

        AugmentationParams {
            rotation_degrees: symmetric(rng, config.rotation_range),
            shift_x: symmetric(rng, config.width_shift_range) * width as f32,
            shift_y: symmetric(rng, config.height_shift_range) * height as f32,
            shear_degrees: symmetric(rng, config.shear_range),
            zoom_x: interval(rng, config.zoom_range),
            zoom_y: interval(rng, config.zoom_range),
            flip_horizontal: config.horizontal_flip && rng.random_bool(0.5),
            flip_vertical: config.vertical_flip && rng.random_bool(0.5),
            brightness: config.brightness_range.map(|range| interval(rng, range)),
        }
    }

    /// Draw parameters and augment one pair.
    pub fn augment<R: Rng + ?Sized>(
        &self,
        image: DynamicImage,
        mask: DynamicImage,
        rng: &mut R,
    ) -> (RgbImage, GrayImage) {
        let (width, height) = image.dimensions();
        let params = self.sample_params(width, height, rng);
        self.apply(image, mask, &params)
    }

    /// Apply a fixed parameter set to one pair.
    pub fn apply(
        &self,
        image: DynamicImage,
        mask: DynamicImage,
        params: &AugmentationParams,
    ) -> (RgbImage, GrayImage) {
        let mut image = image.into_rgb8();
        let mut mask = mask.into_luma8();
        let (width, height) = image.dimensions();

        let transform = params.source_transform(width, height);
        if !transform.is_identity() {
            image = self.warp(&image, &transform, Interpolation::Bilinear, Rgb([0, 0, 0]));
            mask = self.warp(&mask, &transform, Interpolation::Nearest, Luma([0]));
        }

        if params.flip_horizontal {
            image = image::imageops::flip_horizontal(&image);
            mask = image::imageops::flip_horizontal(&mask);
        }
        if params.flip_vertical {
            image = image::imageops::flip_vertical(&image);
            mask = image::imageops::flip_vertical(&mask);
        }

        if let Some(factor) = params.brightness {
            scale_brightness(&mut image, factor);
        }

        (image, mask)
    }

    fn warp<P>(
        &self,
        source: &image::ImageBuffer<P, Vec<u8>>,
        transform: &Affine,
        interpolation: Interpolation,
        default: P,
    ) -> image::ImageBuffer<P, Vec<u8>>
    where
        P: image::Pixel<Subpixel = u8> + Send + Sync,
    {
        let (width, height) = source.dimensions();
        let fill_mode = self.config.fill_mode;
        let transform = *transform;

        warp_with(
            source,
            move |x, y| {
                let (sx, sy) = transform.apply(x, y);
                (fill_mode.wrap(sx, width), fill_mode.wrap(sy, height))
            },
            interpolation,
            default,
        )
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.random_range(-range..=range)
    } else {
        0.0
    }
}

fn interval<R: Rng + ?Sized>(rng: &mut R, (low, high): (f32, f32)) -> f32 {
    if high > low {
        rng.random_range(low..=high)
    } else {
        low
    }
}

fn scale_brightness(image: &mut RgbImage, factor: f32) {
    for value in image.iter_mut() {
        *value = (f32::from(*value) * factor).round().clamp(0.0, 255.0) as u8;
    }
}
