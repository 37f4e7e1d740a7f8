//! Burn batcher for training patch pairs.

use std::marker::PhantomData;

use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::patch::PatchPairs;

/// One context/target patch pair in raw channel-last form.
#[derive(Debug, Clone)]
pub struct PatchItem {
    /// Context patch `[S, S, C]`.
    pub context: Vec<f32>,
    /// Target patch `[P, P]`.
    pub target: Vec<f32>,
    pub context_size: usize,
    pub patch_size: usize,
    pub channels: usize,
}

impl PatchItem {
    /// Split sampled pairs into one item per image.
    pub fn from_pairs<B: Backend>(pairs: PatchPairs<B>) -> Vec<Self> {
        let [count, context_size, _, channels] = pairs.contexts.dims();
        let [_, patch_size, _, _] = pairs.targets.dims();

        let contexts: Vec<f32> = pairs.contexts.into_data().iter::<f32>().collect();
        let targets: Vec<f32> = pairs.targets.into_data().iter::<f32>().collect();

        let context_len = context_size * context_size * channels;
        let target_len = patch_size * patch_size;
        (0..count)
            .map(|i| Self {
                context: contexts[i * context_len..(i + 1) * context_len].to_vec(),
                target: targets[i * target_len..(i + 1) * target_len].to_vec(),
                context_size,
                patch_size,
                channels,
            })
            .collect()
    }
}

/// Batched patch pairs in the `[N, C, H, W]` layout expected by convolutional
/// models.
#[derive(Debug, Clone)]
pub struct PatchBatch<B: Backend> {
    /// Contexts `[N, C, S, S]`.
    pub contexts: Tensor<B, 4>,
    /// Targets `[N, 1, P, P]`.
    pub targets: Tensor<B, 4>,
}

#[derive(Clone, Default)]
pub struct PatchBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> PatchBatcher<B> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for PatchBatcher<B> {
    fn batch(&self, items: Vec<PatchItem>, device: &B::Device) -> PatchBatch<B> {
        let mut contexts = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());

        for item in items {
            let context = Tensor::<B, 3>::from_data(
                TensorData::new(
                    item.context,
                    [item.context_size, item.context_size, item.channels],
                ),
                device,
            )
            .permute([2, 0, 1]); // HWC to CHW

            let target = Tensor::<B, 2>::from_data(
                TensorData::new(item.target, [item.patch_size, item.patch_size]),
                device,
            )
            .unsqueeze::<3>();

            contexts.push(context);
            targets.push(target);
        }

        PatchBatch {
            contexts: Tensor::stack(contexts, 0),
            targets: Tensor::stack(targets, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        patch::{PatchGeometry, PatchSampler},
        tests::TestBackend,
    };
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn batcher_produces_channel_first_tensors() {
        let device = Default::default();
        let batcher = PatchBatcher::<TestBackend>::new();
        let item = |value: f32| PatchItem {
            context: vec![value; 8 * 8 * 3],
            target: vec![1.0; 2 * 2],
            context_size: 8,
            patch_size: 2,
            channels: 3,
        };

        let batch = batcher.batch(vec![item(0.25), item(0.75)], &device);

        assert_eq!(batch.contexts.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2, 1, 2, 2]);
        let second: Vec<f32> = batch
            .contexts
            .narrow(0, 1, 1)
            .into_data()
            .to_vec()
            .unwrap();
        assert!(second.iter().all(|&v| v == 0.75));
    }

    #[test]
    fn sampled_pairs_split_into_items() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::ones([3, 8, 8, 3], &device);
        let masks = Tensor::<TestBackend, 4>::ones([3, 8, 8, 1], &device);
        let sampler = PatchSampler::new(PatchGeometry::new(4).unwrap(), 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let pairs = sampler.sample(images, masks, &mut rng).unwrap();
        let items = PatchItem::from_pairs(pairs);

        assert_eq!(items.len(), 3);
        for item in &items {
            assert_eq!(item.context.len(), 16 * 16 * 3);
            assert_eq!(item.target, vec![1.0; 16]);
            assert_eq!((item.context_size, item.patch_size, item.channels), (16, 4, 3));
        }

        let batch = PatchBatcher::<TestBackend>::new().batch(items, &device);
        assert_eq!(batch.contexts.dims(), [3, 3, 16, 16]);
    }
}
