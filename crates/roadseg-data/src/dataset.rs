//! Directory-backed image/mask sources.
//!
//! A dataset root holds one directory of RGB aerial images and one directory
//! of grayscale ground-truth masks; an image and its mask share a file stem.
//! [`RoadDataset`] indexes the pairs, [`ImageMaskSource`] turns them into an
//! endless stream of shuffled, augmented batches, and [`TestImages`] walks
//! a directory of test images for inference.

use std::{
    collections::HashMap,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use burn::{
    data::dataset::Dataset,
    tensor::{backend::Backend, Tensor},
};
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use roadseg_util::{list_image_files, ColorMode, ImageUtils};

use crate::{
    augmentation::ImageAugmentor,
    error::{DatasetError, DatasetResult},
};

/// Location of a dataset on disk.
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    pub root: PathBuf,
    pub image_dir: String,
    pub mask_dir: String,
}

impl DatasetPaths {
    pub fn new(
        root: impl Into<PathBuf>,
        image_dir: impl Into<String>,
        mask_dir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            image_dir: image_dir.into(),
            mask_dir: mask_dir.into(),
        }
    }

    pub fn image_root(&self) -> PathBuf {
        self.root.join(&self.image_dir)
    }

    pub fn mask_root(&self) -> PathBuf {
        self.root.join(&self.mask_dir)
    }
}

/// One loaded pair in raw form, following Burn's convention that datasets
/// return plain data and batchers build tensors.
#[derive(Debug, Clone)]
pub struct RoadItem {
    /// RGB image as `[H, W, 3]` values in `[0, 1]`.
    pub image: Vec<f32>,
    /// Binary mask as `[H, W]` values in `{0, 1}`.
    pub mask: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

/// Image/mask pairs of one dataset split, resized to a square target size.
#[derive(Debug, Clone)]
pub struct RoadDataset {
    items: Vec<(PathBuf, PathBuf)>,
    target_size: u32,
}

impl RoadDataset {
    /// Index all image/mask pairs below `paths`.
    ///
    /// Images without a mask are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Fails when either directory is missing or no pair is found.
    pub fn new(paths: &DatasetPaths, target_size: u32) -> DatasetResult<Self> {
        let items = Self::collect_dataset_items(paths)?;
        Ok(Self { items, target_size })
    }

    fn collect_dataset_items(paths: &DatasetPaths) -> DatasetResult<Vec<(PathBuf, PathBuf)>> {
        let image_root = paths.image_root();
        let mask_root = paths.mask_root();

        if !image_root.is_dir() {
            return Err(DatasetError::ImageDirectoryNotFound { path: image_root });
        }
        if !mask_root.is_dir() {
            return Err(DatasetError::MaskDirectoryNotFound { path: mask_root });
        }

        let mut masks_by_stem = HashMap::new();
        for mask_path in list_image_files(&mask_root)? {
            masks_by_stem.insert(file_stem(&mask_path)?, mask_path);
        }

        let mut items = Vec::new();
        for image_path in list_image_files(&image_root)? {
            match masks_by_stem.remove(&file_stem(&image_path)?) {
                Some(mask_path) => items.push((image_path, mask_path)),
                None => {
                    tracing::warn!(image = %image_path.display(), "no mask found for image");
                }
            }
        }

        if items.is_empty() {
            return Err(DatasetError::NoValidPairs { path: image_root });
        }

        tracing::info!(
            pairs = items.len(),
            root = %paths.root.display(),
            "found image/mask pairs"
        );
        Ok(items)
    }

    pub const fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Paths of the pair at `index`.
    pub fn paths(&self, index: usize) -> Option<&(PathBuf, PathBuf)> {
        self.items.get(index)
    }

    /// Decode the pair at `index`, augment it if an augmentor is given, and
    /// resize both to the target size.
    pub fn load_pair(
        &self,
        index: usize,
        augmentation: Option<(&ImageAugmentor, &mut StdRng)>,
    ) -> DatasetResult<(RgbImage, GrayImage)> {
        let Some((image_path, mask_path)) = self.items.get(index) else {
            return Err(DatasetError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        };

        let image = ImageUtils::open(image_path)?;
        let mask = ImageUtils::open(mask_path)?;

        let (image, mask) = match augmentation {
            Some((augmentor, rng)) => augmentor.augment(image, mask, rng),
            None => (image.into_rgb8(), mask.into_luma8()),
        };

        let size = self.target_size;
        let image = image::imageops::resize(&image, size, size, FilterType::Triangle);
        let mask = image::imageops::resize(&mask, size, size, FilterType::Nearest);
        Ok((image, mask))
    }
}

impl Dataset<RoadItem> for RoadDataset {
    fn get(&self, index: usize) -> Option<RoadItem> {
        let (image, mask) = match self.load_pair(index, None) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(index, error = %e, "failed to load image/mask pair");
                return None;
            }
        };

        let height = image.height() as usize;
        let width = image.width() as usize;
        let image = DynamicImage::ImageRgb8(image).into_rgb32f().into_raw();
        let mask = mask
            .into_raw()
            .into_iter()
            .map(|v| if v > 127 { 1.0 } else { 0.0 })
            .collect();

        Some(RoadItem {
            image,
            mask,
            height,
            width,
        })
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

fn file_stem(path: &Path) -> DatasetResult<String> {
    path.file_stem()
        .ok_or_else(|| DatasetError::NoFileStem {
            path: path.to_path_buf(),
        })?
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| DatasetError::InvalidUtf8Path {
            path: path.to_path_buf(),
        })
}

/// Endless stream of image/mask batches drawn from a [`RoadDataset`].
///
/// Pairs are visited in a shuffled order that is reshuffled every epoch; the
/// last batch of an epoch may be smaller. All randomness (order and
/// augmentation) comes from the seed, so two sources with the same seed
/// produce the same stream.
pub struct ImageMaskSource<B: Backend> {
    dataset: RoadDataset,
    augmentor: Option<ImageAugmentor>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    rng: StdRng,
    device: B::Device,
}

impl<B: Backend> ImageMaskSource<B> {
    /// # Errors
    ///
    /// [`DatasetError::InvalidBatchSize`] for a zero batch size.
    pub fn new(
        dataset: RoadDataset,
        augmentor: Option<ImageAugmentor>,
        batch_size: usize,
        seed: u64,
        device: B::Device,
    ) -> DatasetResult<Self> {
        if batch_size == 0 {
            return Err(DatasetError::InvalidBatchSize);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            dataset,
            augmentor,
            batch_size,
            order,
            cursor: 0,
            epoch: 0,
            rng,
            device,
        })
    }

    pub const fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub const fn device(&self) -> &B::Device {
        &self.device
    }

    /// Load the next batch as normalized `[N, S, S, 3]` images and binary
    /// `[N, S, S, 1]` masks.
    pub fn next_batch(&mut self) -> DatasetResult<(Tensor<B, 4>, Tensor<B, 4>)> {
        if self.cursor >= self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
            self.epoch += 1;
            tracing::debug!(epoch = self.epoch, "reshuffled image/mask source");
        }

        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        let mut images = Vec::with_capacity(indices.len());
        let mut masks = Vec::with_capacity(indices.len());
        for index in indices {
            let augmentation = self.augmentor.as_ref().map(|a| (a, &mut self.rng));
            let (image, mask) = self.dataset.load_pair(index, augmentation)?;

            images.push(ImageUtils::dynamic_image_to_tensor::<B>(
                DynamicImage::ImageRgb8(image),
                ColorMode::Rgb,
                &self.device,
            )?);
            masks.push(ImageUtils::dynamic_image_to_tensor::<B>(
                DynamicImage::ImageLuma8(mask),
                ColorMode::Grayscale,
                &self.device,
            )?);
        }

        let images = ImageUtils::stack_images(images)?;
        let masks = ImageUtils::stack_images(masks)?;
        Ok(ImageUtils::normalize_pair(images, masks))
    }
}

/// Test images of a directory, normalized and resized to a square size.
///
/// Iteration is lazy (one file is decoded per step), ordered by file name,
/// and can be restarted with [`TestImages::iter`].
pub struct TestImages<B: Backend> {
    files: Vec<PathBuf>,
    target_size: u32,
    device: B::Device,
}

impl<B: Backend> TestImages<B> {
    /// # Errors
    ///
    /// Fails when the directory cannot be read or holds no images.
    pub fn new(dir: impl AsRef<Path>, target_size: u32, device: B::Device) -> DatasetResult<Self> {
        let dir = dir.as_ref();
        let files = list_image_files(dir)?;
        if files.is_empty() {
            return Err(DatasetError::NoTestImages {
                path: dir.to_path_buf(),
            });
        }

        tracing::info!(images = files.len(), dir = %dir.display(), "found test images");
        Ok(Self {
            files,
            target_size,
            device,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load one test image as a `[S, S, 3]` tensor in `[0, 1]`.
    pub fn load(&self, path: &Path) -> DatasetResult<Tensor<B, 3>> {
        let image = ImageUtils::load_resized::<B, _>(
            path,
            ColorMode::Rgb,
            self.target_size,
            FilterType::Triangle,
            &self.device,
        )?;
        Ok(ImageUtils::normalize_intensity(image))
    }

    pub fn iter(&self) -> TestImageIter<'_, B> {
        TestImageIter {
            images: self,
            next: 0,
            _backend: PhantomData,
        }
    }
}

/// Iterator over `(path, image)` pairs of a [`TestImages`] directory.
pub struct TestImageIter<'a, B: Backend> {
    images: &'a TestImages<B>,
    next: usize,
    _backend: PhantomData<B>,
}

impl<B: Backend> Iterator for TestImageIter<'_, B> {
    type Item = DatasetResult<(PathBuf, Tensor<B, 3>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.images.files.get(self.next)?.clone();
        self.next += 1;
        Some(self.images.load(&path).map(|image| (path, image)))
    }
}
