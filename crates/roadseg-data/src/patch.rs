//! Patch extraction with surrounding context.
//!
//! A *target* patch is a `P x P` square of the mask (or of a prediction). Its
//! *context* is the concentric square of side `P + 2m` taken from the image
//! after reflect padding by `m = (4P - P) / 2`, so that patches touching the
//! image border still see a full neighbourhood.
//!
//! Training draws random patches ([`PatchSampler`]); inference cuts a whole
//! image into a grid ([`PatchTiler`]) and folds per-tile predictions back
//! together ([`reassemble_tiles`], [`reassemble_ordered`]).

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use rand::Rng;
use roadseg_util::pad_reflect;

use crate::error::{PatchError, PatchResult};

/// Mean mask value above which a candidate patch counts as containing road.
pub const ROAD_PRESENCE_THRESHOLD: f32 = 0.1;

/// Draws per image before the sampler gives up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 10_000;

/// Side lengths derived from the target patch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGeometry {
    patch_size: usize,
}

impl PatchGeometry {
    /// # Errors
    ///
    /// [`PatchError::InvalidPatchSize`] for a zero patch size.
    pub fn new(patch_size: usize) -> PatchResult<Self> {
        if patch_size == 0 {
            return Err(PatchError::InvalidPatchSize { patch_size });
        }
        Ok(Self { patch_size })
    }

    /// Side of the target patch.
    pub const fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Reflect padding applied around the image, `(4P - P) / 2`.
    pub const fn margin(&self) -> usize {
        (4 * self.patch_size - self.patch_size) / 2
    }

    /// Side of the context patch, `P + 2 * margin` (`4P` for even `P`).
    pub const fn context_size(&self) -> usize {
        self.patch_size + 2 * self.margin()
    }
}

/// Why the sampler kept a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// The target patch holds enough road.
    Road,
    /// Accepted by the random skip draw despite too little road.
    Skip,
}

/// Top-left corner of an accepted target patch in unpadded image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchAnchor {
    pub y: usize,
    pub x: usize,
    pub acceptance: Acceptance,
    /// Number of candidates drawn, including the accepted one.
    pub attempts: usize,
}

/// Context/target pairs drawn from one batch, in batch order.
#[derive(Debug, Clone)]
pub struct PatchPairs<B: Backend> {
    /// `[N, S, S, C]` context patches from the padded images.
    pub contexts: Tensor<B, 4>,
    /// `[N, P, P, 1]` target patches from the masks.
    pub targets: Tensor<B, 4>,
    /// Where each pair was cut.
    pub anchors: Vec<PatchAnchor>,
}

impl<B: Backend> PatchPairs<B> {
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

/// Random patch sampler for the training path.
///
/// For every image a uniformly random anchor is drawn until the target patch
/// holds road (mean above [`ROAD_PRESENCE_THRESHOLD`]) or an independent
/// uniform draw falls below the skip probability. A skip probability of 0
/// therefore insists on road, while 1 takes the first candidate.
#[derive(Debug, Clone)]
pub struct PatchSampler {
    geometry: PatchGeometry,
    skip_probability: f64,
    max_attempts: usize,
}

impl PatchSampler {
    /// # Errors
    ///
    /// [`PatchError::InvalidProbability`] when `skip_probability` is outside `[0, 1]`.
    pub fn new(geometry: PatchGeometry, skip_probability: f64) -> PatchResult<Self> {
        if !(0.0..=1.0).contains(&skip_probability) {
            return Err(PatchError::InvalidProbability {
                value: skip_probability,
            });
        }

        Ok(Self {
            geometry,
            skip_probability,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Bound the number of candidates drawn per image.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub const fn geometry(&self) -> PatchGeometry {
        self.geometry
    }

    pub const fn skip_probability(&self) -> f64 {
        self.skip_probability
    }

    /// Draw one context/target pair per image.
    ///
    /// `images` is `[N, H, W, C]` and `masks` is `[N, H, W, 1]`, both already
    /// normalized to `[0, 1]`.
    ///
    /// # Errors
    ///
    /// * [`PatchError::ShapeMismatch`] when images and masks disagree.
    /// * [`PatchError::PatchExceedsImage`] when no anchor fits.
    /// * [`PatchError::SamplingExhausted`] when an image yields no acceptable
    ///   patch within the attempt budget.
    pub fn sample<B: Backend, R: Rng + ?Sized>(
        &self,
        images: Tensor<B, 4>,
        masks: Tensor<B, 4>,
        rng: &mut R,
    ) -> PatchResult<PatchPairs<B>> {
        let image_dims = images.dims();
        let mask_dims = masks.dims();
        let [num_images, height, width, _] = image_dims;
        if num_images == 0 {
            return Err(PatchError::NoImages);
        }
        if mask_dims[0] != num_images || mask_dims[1] != height || mask_dims[2] != width {
            return Err(PatchError::ShapeMismatch {
                images: image_dims,
                masks: mask_dims,
            });
        }

        let patch_size = self.geometry.patch_size();
        if patch_size > height || patch_size > width {
            return Err(PatchError::PatchExceedsImage {
                patch_size,
                height,
                width,
            });
        }

        let context_size = self.geometry.context_size();
        let padded = pad_reflect(images, self.geometry.margin())?;

        let mut contexts = Vec::with_capacity(num_images);
        let mut targets = Vec::with_capacity(num_images);
        let mut anchors = Vec::with_capacity(num_images);

        for index in 0..num_images {
            let mask = masks.clone().narrow(0, index, 1);
            let (anchor, target) = self.draw(index, mask, height, width, rng)?;

            // The padded image is shifted by `margin`, so the context of the
            // target at (y, x) starts at (y, x) in padded coordinates.
            let context = padded
                .clone()
                .narrow(0, index, 1)
                .narrow(1, anchor.y, context_size)
                .narrow(2, anchor.x, context_size);

            contexts.push(context);
            targets.push(target);
            anchors.push(anchor);
        }

        Ok(PatchPairs {
            contexts: Tensor::cat(contexts, 0),
            targets: Tensor::cat(targets, 0),
            anchors,
        })
    }

    fn draw<B: Backend, R: Rng + ?Sized>(
        &self,
        index: usize,
        mask: Tensor<B, 4>,
        height: usize,
        width: usize,
        rng: &mut R,
    ) -> PatchResult<(PatchAnchor, Tensor<B, 4>)> {
        let patch_size = self.geometry.patch_size();

        for attempt in 1..=self.max_attempts {
            let y = rng.random_range(0..=height - patch_size);
            let x = rng.random_range(0..=width - patch_size);

            let target = mask
                .clone()
                .narrow(1, y, patch_size)
                .narrow(2, x, patch_size);
            let road = target.clone().mean().into_scalar().elem::<f32>();

            let acceptance = if road > ROAD_PRESENCE_THRESHOLD {
                Some(Acceptance::Road)
            } else if rng.random::<f64>() < self.skip_probability {
                Some(Acceptance::Skip)
            } else {
                None
            };

            if let Some(acceptance) = acceptance {
                let anchor = PatchAnchor {
                    y,
                    x,
                    acceptance,
                    attempts: attempt,
                };
                return Ok((anchor, target));
            }
        }

        tracing::warn!(
            image = index,
            attempts = self.max_attempts,
            skip_probability = self.skip_probability,
            "patch sampling exhausted"
        );
        Err(PatchError::SamplingExhausted {
            image: index,
            attempts: self.max_attempts,
        })
    }
}

/// Position of one tile in the reassembly grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Index of the source image.
    pub image: usize,
    /// Grid row, `y / P`.
    pub row: usize,
    /// Grid column, `x / P`.
    pub col: usize,
    /// Top edge of the target footprint in the unpadded image.
    pub y: usize,
    /// Left edge of the target footprint in the unpadded image.
    pub x: usize,
}

/// Cuts a square image into non-overlapping target cells, each paired with
/// its context patch.
#[derive(Debug, Clone)]
pub struct PatchTiler<B: Backend> {
    padded: Tensor<B, 3>,
    geometry: PatchGeometry,
    dim: usize,
    image: usize,
}

impl<B: Backend> PatchTiler<B> {
    /// Pad `image` (`[S, S, C]`) once and prepare the tile grid.
    ///
    /// # Errors
    ///
    /// [`PatchError::NotTileable`] unless the image is square with a side
    /// divisible by the patch size.
    pub fn new(image: Tensor<B, 3>, geometry: PatchGeometry) -> PatchResult<Self> {
        let [height, width, _] = image.dims();
        let patch_size = geometry.patch_size();
        if height != width || height % patch_size != 0 || height == 0 {
            return Err(PatchError::NotTileable {
                height,
                width,
                patch_size,
            });
        }

        let padded = pad_reflect(image, geometry.margin())?;

        Ok(Self {
            padded,
            geometry,
            dim: height / patch_size,
            image: 0,
        })
    }

    /// Tag emitted coordinates with the index of the source image.
    #[must_use]
    pub fn with_image_index(mut self, image: usize) -> Self {
        self.image = image;
        self
    }

    /// Tiles per row and per column.
    pub const fn grid_dim(&self) -> usize {
        self.dim
    }

    /// Total number of tiles.
    pub const fn len(&self) -> usize {
        self.dim * self.dim
    }

    pub const fn is_empty(&self) -> bool {
        self.dim == 0
    }

    pub const fn geometry(&self) -> PatchGeometry {
        self.geometry
    }

    /// Iterate the tiles in row-major order. Each call starts over.
    pub fn tiles(&self) -> Tiles<'_, B> {
        Tiles {
            tiler: self,
            next: 0,
        }
    }

    fn tile(&self, position: usize) -> (TileCoord, Tensor<B, 3>) {
        let patch_size = self.geometry.patch_size();
        let context_size = self.geometry.context_size();
        let row = position / self.dim;
        let col = position % self.dim;
        let coord = TileCoord {
            image: self.image,
            row,
            col,
            y: row * patch_size,
            x: col * patch_size,
        };

        let context = self
            .padded
            .clone()
            .narrow(0, coord.y, context_size)
            .narrow(1, coord.x, context_size);

        (coord, context)
    }
}

/// Lazy row-major iterator over `(coordinate, context)` pairs of a [`PatchTiler`].
#[derive(Debug)]
pub struct Tiles<'a, B: Backend> {
    tiler: &'a PatchTiler<B>,
    next: usize,
}

impl<B: Backend> Iterator for Tiles<'_, B> {
    type Item = (TileCoord, Tensor<B, 3>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.tiler.len() {
            return None;
        }
        let item = self.tiler.tile(self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.tiler.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl<B: Backend> ExactSizeIterator for Tiles<'_, B> {}

fn grid_dim(patch_size: usize, full_side: usize, num_images: usize) -> PatchResult<usize> {
    if num_images == 0 {
        return Err(PatchError::NoImages);
    }
    if patch_size == 0 || full_side == 0 || full_side % patch_size != 0 {
        return Err(PatchError::NotTileable {
            height: full_side,
            width: full_side,
            patch_size,
        });
    }
    Ok(full_side / patch_size)
}

/// Fold a flat `[K, P, P]` sequence of tile results back into `[N, S, S]` images.
///
/// The tiles must come in the exact order [`PatchTiler::tiles`] produces them,
/// image after image. Prefer [`reassemble_tiles`] when coordinates are at hand.
///
/// # Errors
///
/// [`PatchError::TileCountMismatch`] unless `K == num_images * (S / P)^2`, and
/// [`PatchError::TileShapeMismatch`] when tiles are not `P x P`.
pub fn reassemble_ordered<B: Backend>(
    results: Tensor<B, 3>,
    num_images: usize,
    patch_size: usize,
    full_side: usize,
) -> PatchResult<Tensor<B, 3>> {
    let dim = grid_dim(patch_size, full_side, num_images)?;
    let [count, tile_height, tile_width] = results.dims();

    let expected = num_images * dim * dim;
    if count != expected {
        return Err(PatchError::TileCountMismatch {
            expected,
            actual: count,
        });
    }
    if tile_height != patch_size || tile_width != patch_size {
        return Err(PatchError::TileShapeMismatch {
            expected: patch_size,
            actual: vec![tile_height, tile_width],
        });
    }

    Ok(results
        .reshape([num_images, dim, dim, patch_size, patch_size])
        .swap_dims(2, 3)
        .reshape([num_images, full_side, full_side]))
}

/// Place `[P, P]` tile results by their coordinates into `[N, S, S]` images.
///
/// Input order does not matter; every grid cell must be covered exactly once.
///
/// # Errors
///
/// [`PatchError::TileOutOfRange`], [`PatchError::DuplicateTile`] and
/// [`PatchError::MissingTile`] for coordinate problems,
/// [`PatchError::TileShapeMismatch`] for tiles that are not `P x P`.
pub fn reassemble_tiles<B: Backend>(
    tiles: Vec<(TileCoord, Tensor<B, 2>)>,
    num_images: usize,
    patch_size: usize,
    full_side: usize,
) -> PatchResult<Tensor<B, 3>> {
    let dim = grid_dim(patch_size, full_side, num_images)?;
    let mut grid: Vec<Option<Tensor<B, 2>>> = vec![None; num_images * dim * dim];

    for (coord, tile) in tiles {
        let TileCoord {
            image, row, col, ..
        } = coord;
        if image >= num_images || row >= dim || col >= dim {
            return Err(PatchError::TileOutOfRange {
                image,
                row,
                col,
                num_images,
                dim,
            });
        }

        let [tile_height, tile_width] = tile.dims();
        if tile_height != patch_size || tile_width != patch_size {
            return Err(PatchError::TileShapeMismatch {
                expected: patch_size,
                actual: vec![tile_height, tile_width],
            });
        }

        let slot = &mut grid[(image * dim + row) * dim + col];
        if slot.is_some() {
            return Err(PatchError::DuplicateTile { image, row, col });
        }
        *slot = Some(tile);
    }

    let mut cells = grid.into_iter();
    let mut images = Vec::with_capacity(num_images);
    for image in 0..num_images {
        let mut rows = Vec::with_capacity(dim);
        for row in 0..dim {
            let mut columns = Vec::with_capacity(dim);
            for col in 0..dim {
                let tile = cells
                    .next()
                    .flatten()
                    .ok_or(PatchError::MissingTile { image, row, col })?;
                columns.push(tile);
            }
            rows.push(Tensor::cat(columns, 1));
        }
        images.push(Tensor::cat(rows, 0));
    }

    Ok(Tensor::stack(images, 0))
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::tests::TestBackend;

    fn ramp(height: usize, width: usize) -> Tensor<TestBackend, 3> {
        let values: Vec<f32> = (0..height * width).map(|v| v as f32).collect();
        Tensor::from_data(
            TensorData::new(values, [height, width, 1]),
            &Default::default(),
        )
    }

    fn to_vec<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn geometry_derives_margin_and_context() {
        let geometry = PatchGeometry::new(16).unwrap();
        assert_eq!(geometry.margin(), 24);
        assert_eq!(geometry.context_size(), 64);

        let odd = PatchGeometry::new(5).unwrap();
        assert_eq!(odd.margin(), 7);
        assert_eq!(odd.context_size(), 19);

        assert!(matches!(
            PatchGeometry::new(0).unwrap_err(),
            PatchError::InvalidPatchSize { .. }
        ));
    }

    #[test]
    fn sampler_rejects_invalid_probability() {
        let geometry = PatchGeometry::new(4).unwrap();
        assert!(PatchSampler::new(geometry, 1.5).is_err());
        assert!(PatchSampler::new(geometry, -0.1).is_err());
        assert!(PatchSampler::new(geometry, 0.0).is_ok());
    }

    #[test]
    fn sampler_context_is_concentric_with_target() {
        let geometry = PatchGeometry::new(2).unwrap();
        let sampler = PatchSampler::new(geometry, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        // The image doubles as its own mask so the target can be located
        // inside the context by value.
        let image = ramp(10, 10).div_scalar(100.0).unsqueeze::<4>();
        let mask = image.clone();

        for _ in 0..20 {
            let pairs = sampler
                .sample(image.clone(), mask.clone(), &mut rng)
                .unwrap();
            assert_eq!(pairs.contexts.dims(), [1, 8, 8, 1]);
            assert_eq!(pairs.targets.dims(), [1, 2, 2, 1]);

            let margin = geometry.margin();
            let center = pairs
                .contexts
                .clone()
                .narrow(1, margin, 2)
                .narrow(2, margin, 2);
            assert_eq!(to_vec(center), to_vec(pairs.targets.clone()));

            let anchor = pairs.anchors[0];
            assert!(anchor.y <= 8 && anchor.x <= 8);
        }
    }

    #[test]
    fn sampler_without_skip_only_accepts_road() {
        let device = Default::default();
        let geometry = PatchGeometry::new(2).unwrap();
        let sampler = PatchSampler::new(geometry, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        // A single road pixel in an otherwise empty 8x8 mask.
        let mut mask = vec![0.0_f32; 64];
        mask[5 * 8 + 6] = 1.0;
        let mask = Tensor::<TestBackend, 4>::from_data(TensorData::new(mask, [1, 8, 8, 1]), &device);
        let image = Tensor::<TestBackend, 4>::zeros([1, 8, 8, 3], &device);

        for _ in 0..10 {
            let pairs = sampler.sample(image.clone(), mask.clone(), &mut rng).unwrap();
            let anchor = pairs.anchors[0];
            assert_eq!(anchor.acceptance, Acceptance::Road);
            assert!((4..=5).contains(&anchor.y));
            assert!((5..=6).contains(&anchor.x));
            assert!(to_vec(pairs.targets).iter().sum::<f32>() > 0.0);
        }
    }

    #[test]
    fn sampler_with_full_skip_takes_first_candidate() {
        let device = Default::default();
        let geometry = PatchGeometry::new(4).unwrap();
        let sampler = PatchSampler::new(geometry, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        let images = Tensor::<TestBackend, 4>::ones([3, 12, 12, 3], &device);
        let masks = Tensor::<TestBackend, 4>::zeros([3, 12, 12, 1], &device);

        let pairs = sampler.sample(images, masks, &mut rng).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs.contexts.dims(), [3, 16, 16, 3]);
        for anchor in &pairs.anchors {
            assert_eq!(anchor.acceptance, Acceptance::Skip);
            assert_eq!(anchor.attempts, 1);
        }
    }

    #[test]
    fn sampler_background_acceptance_tracks_skip_probability() {
        let device = Default::default();
        let geometry = PatchGeometry::new(2).unwrap();
        let sampler = PatchSampler::new(geometry, 0.25).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);

        let images = Tensor::<TestBackend, 4>::zeros([1, 4, 4, 1], &device);
        let masks = Tensor::<TestBackend, 4>::zeros([1, 4, 4, 1], &device);

        let mut draws = 0;
        let trials = 400;
        for _ in 0..trials {
            let pairs = sampler.sample(images.clone(), masks.clone(), &mut rng).unwrap();
            draws += pairs.anchors[0].attempts;
        }

        // Every trial ends with exactly one accepted background candidate.
        let frequency = trials as f64 / draws as f64;
        assert!((frequency - 0.25).abs() < 0.05, "frequency {frequency}");
    }

    #[test]
    fn sampler_fails_fast_when_patch_exceeds_image() {
        let device = Default::default();
        let sampler = PatchSampler::new(PatchGeometry::new(16).unwrap(), 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let images = Tensor::<TestBackend, 4>::zeros([1, 8, 8, 3], &device);
        let masks = Tensor::<TestBackend, 4>::zeros([1, 8, 8, 1], &device);

        assert!(matches!(
            sampler.sample(images, masks, &mut rng).unwrap_err(),
            PatchError::PatchExceedsImage {
                patch_size: 16,
                height: 8,
                width: 8
            }
        ));
    }

    #[test]
    fn sampler_gives_up_after_attempt_budget() {
        let device = Default::default();
        let sampler = PatchSampler::new(PatchGeometry::new(2).unwrap(), 0.0)
            .unwrap()
            .with_max_attempts(25);
        let mut rng = StdRng::seed_from_u64(0);

        let images = Tensor::<TestBackend, 4>::zeros([2, 6, 6, 3], &device);
        let masks = Tensor::<TestBackend, 4>::zeros([2, 6, 6, 1], &device);

        assert!(matches!(
            sampler.sample(images, masks, &mut rng).unwrap_err(),
            PatchError::SamplingExhausted {
                image: 0,
                attempts: 25
            }
        ));
    }

    #[test]
    fn sampler_rejects_mismatched_masks() {
        let device = Default::default();
        let sampler = PatchSampler::new(PatchGeometry::new(2).unwrap(), 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let images = Tensor::<TestBackend, 4>::zeros([2, 6, 6, 3], &device);
        let masks = Tensor::<TestBackend, 4>::zeros([1, 6, 6, 1], &device);

        assert!(matches!(
            sampler.sample(images, masks, &mut rng).unwrap_err(),
            PatchError::ShapeMismatch { .. }
        ));
    }

    #[test]
    fn tiler_emits_row_major_coordinates() {
        let geometry = PatchGeometry::new(2).unwrap();
        let tiler = PatchTiler::new(ramp(6, 6), geometry)
            .unwrap()
            .with_image_index(4);

        assert_eq!(tiler.grid_dim(), 3);
        assert_eq!(tiler.tiles().len(), 9);

        let coords: Vec<(usize, usize)> = tiler.tiles().map(|(c, _)| (c.row, c.col)).collect();
        assert_eq!(
            coords,
            vec![
                (0, 0),
                (0, 1),
                (0, 2),
                (1, 0),
                (1, 1),
                (1, 2),
                (2, 0),
                (2, 1),
                (2, 2)
            ]
        );

        let (coord, context) = tiler.tiles().nth(5).unwrap();
        assert_eq!(coord.image, 4);
        assert_eq!((coord.y, coord.x), (2, 4));
        assert_eq!(context.dims(), [8, 8, 1]);

        // The centre of the context is the target footprint of the source image.
        let center = context.narrow(0, 3, 2).narrow(1, 3, 2);
        assert_eq!(to_vec(center), vec![16.0, 17.0, 22.0, 23.0]);
    }

    #[test]
    fn tiler_is_restartable() {
        let tiler = PatchTiler::new(ramp(4, 4), PatchGeometry::new(2).unwrap()).unwrap();

        let first: Vec<Vec<f32>> = tiler.tiles().map(|(_, t)| to_vec(t)).collect();
        let second: Vec<Vec<f32>> = tiler.tiles().map(|(_, t)| to_vec(t)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn tiler_rejects_untileable_images() {
        let geometry = PatchGeometry::new(4).unwrap();
        assert!(matches!(
            PatchTiler::new(ramp(10, 10), geometry).unwrap_err(),
            PatchError::NotTileable { .. }
        ));
        assert!(matches!(
            PatchTiler::new(ramp(8, 12), geometry).unwrap_err(),
            PatchError::NotTileable { .. }
        ));
    }

    fn center_tiles(
        tiler: &PatchTiler<TestBackend>,
        geometry: PatchGeometry,
    ) -> Vec<(TileCoord, Tensor<TestBackend, 2>)> {
        let patch_size = geometry.patch_size();
        tiler
            .tiles()
            .map(|(coord, context)| {
                let tile = context
                    .narrow(0, geometry.margin(), patch_size)
                    .narrow(1, geometry.margin(), patch_size)
                    .reshape([patch_size, patch_size]);
                (coord, tile)
            })
            .collect()
    }

    #[test]
    fn ordered_round_trip_reconstructs_images() {
        let geometry = PatchGeometry::new(2).unwrap();
        let first = ramp(6, 6);
        let second = ramp(6, 6).mul_scalar(-1.0);

        let mut flat = Vec::new();
        for image in [first.clone(), second.clone()] {
            let tiler = PatchTiler::new(image, geometry).unwrap();
            flat.extend(
                center_tiles(&tiler, geometry)
                    .into_iter()
                    .map(|(_, t)| t.unsqueeze::<3>()),
            );
        }

        let rebuilt = reassemble_ordered(Tensor::cat(flat, 0), 2, 2, 6).unwrap();
        assert_eq!(rebuilt.dims(), [2, 6, 6]);

        let expected = Tensor::cat(vec![first, second], 2).swap_dims(0, 2).swap_dims(1, 2);
        assert_eq!(to_vec(rebuilt), to_vec(expected));
    }

    #[test]
    fn coordinate_round_trip_ignores_order() {
        let geometry = PatchGeometry::new(4).unwrap();
        let image = ramp(12, 12);
        let tiler = PatchTiler::new(image.clone(), geometry).unwrap();

        let mut tiles = center_tiles(&tiler, geometry);
        tiles.reverse();
        tiles.swap(1, 5);

        let rebuilt = reassemble_tiles(tiles, 1, 4, 12).unwrap();
        assert_eq!(to_vec(rebuilt), to_vec(image));
    }

    #[test]
    fn ordered_reassembly_checks_tile_count() {
        let results = Tensor::<TestBackend, 3>::zeros([8, 2, 2], &Default::default());
        assert!(matches!(
            reassemble_ordered(results, 1, 2, 6).unwrap_err(),
            PatchError::TileCountMismatch {
                expected: 9,
                actual: 8
            }
        ));
    }

    #[test]
    fn coordinate_reassembly_reports_bad_grids() {
        let geometry = PatchGeometry::new(2).unwrap();
        let tiler = PatchTiler::new(ramp(4, 4), geometry).unwrap();

        let mut missing = center_tiles(&tiler, geometry);
        missing.pop();
        assert!(matches!(
            reassemble_tiles(missing, 1, 2, 4).unwrap_err(),
            PatchError::MissingTile {
                image: 0,
                row: 1,
                col: 1
            }
        ));

        let mut duplicated = center_tiles(&tiler, geometry);
        let copy = duplicated[0].clone();
        duplicated[1] = copy;
        assert!(matches!(
            reassemble_tiles(duplicated, 1, 2, 4).unwrap_err(),
            PatchError::DuplicateTile { .. }
        ));

        let stray = center_tiles(&tiler, geometry)
            .into_iter()
            .map(|(coord, tile)| (TileCoord { image: 1, ..coord }, tile))
            .collect();
        assert!(matches!(
            reassemble_tiles(stray, 1, 2, 4).unwrap_err(),
            PatchError::TileOutOfRange { .. }
        ));
    }
}
