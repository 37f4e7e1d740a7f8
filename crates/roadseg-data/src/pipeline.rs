//! Training-time patch pipeline.
//!
//! [`PatchPipeline`] owns everything the training loop pulls from: the
//! training source, a fixed set of validation patches, the sampler and the
//! random generator. Each call advances the pipeline by one step.

use burn::tensor::backend::Backend;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    dataset::ImageMaskSource,
    error::DatasetResult,
    patch::{PatchPairs, PatchSampler},
};

pub struct PatchPipeline<B: Backend> {
    train: ImageMaskSource<B>,
    sampler: PatchSampler,
    validation: Vec<PatchPairs<B>>,
    validation_cursor: usize,
    rng: StdRng,
}

impl<B: Backend> PatchPipeline<B> {
    /// Build a pipeline and draw `validation_steps` validation patch sets from
    /// `validation` up front.
    ///
    /// The validation source should use batch size one and no augmentation;
    /// the drawn patches are replayed in the same order forever.
    ///
    /// # Errors
    ///
    /// Any load or sampling error while drawing the validation patches.
    pub fn new(
        train: ImageMaskSource<B>,
        validation: Option<ImageMaskSource<B>>,
        sampler: PatchSampler,
        validation_steps: usize,
        seed: u64,
    ) -> DatasetResult<Self> {
        let mut rng = StdRng::seed_from_u64(seed);

        let mut patches = Vec::new();
        if let Some(mut source) = validation {
            patches.reserve(validation_steps);
            for _ in 0..validation_steps {
                let (images, masks) = source.next_batch()?;
                patches.push(sampler.sample(images, masks, &mut rng)?);
            }
            tracing::info!(steps = patches.len(), "drew fixed validation patches");
        }

        Ok(Self {
            train,
            sampler,
            validation: patches,
            validation_cursor: 0,
            rng,
        })
    }

    pub const fn sampler(&self) -> &PatchSampler {
        &self.sampler
    }

    /// Number of distinct validation patch sets.
    pub fn validation_len(&self) -> usize {
        self.validation.len()
    }

    /// Load the next training batch and sample one patch pair per image.
    pub fn next_train_batch(&mut self) -> DatasetResult<PatchPairs<B>> {
        let (images, masks) = self.train.next_batch()?;
        Ok(self.sampler.sample(images, masks, &mut self.rng)?)
    }

    /// The next fixed validation patch set, cycling; `None` without validation data.
    pub fn next_validation_batch(&mut self) -> Option<PatchPairs<B>> {
        if self.validation.is_empty() {
            return None;
        }
        let pairs = self.validation[self.validation_cursor].clone();
        self.validation_cursor = (self.validation_cursor + 1) % self.validation.len();
        Some(pairs)
    }
}
