//! Whole-image prediction on top of the patch tiler.

use burn::tensor::{backend::Backend, Tensor};

use crate::{
    error::{PatchError, PatchResult},
    patch::{reassemble_tiles, PatchGeometry, PatchTiler, TileCoord},
};

/// A model that maps context patches to target-sized predictions.
pub trait PatchPredictor<B: Backend> {
    /// Predict `[K, P, P]` maps for `[K, S, S, C]` context patches.
    fn predict(&self, contexts: Tensor<B, 4>) -> Tensor<B, 3>;
}

/// Predicts the centre of each context, averaged over channels.
///
/// Fed with a mask instead of an image, it reproduces the mask exactly, which
/// makes it a reference for checking the tile/reassemble path end to end.
#[derive(Debug, Clone, Copy)]
pub struct CenterCropPredictor {
    geometry: PatchGeometry,
}

impl CenterCropPredictor {
    pub const fn new(geometry: PatchGeometry) -> Self {
        Self { geometry }
    }
}

impl<B: Backend> PatchPredictor<B> for CenterCropPredictor {
    fn predict(&self, contexts: Tensor<B, 4>) -> Tensor<B, 3> {
        let [count, _, _, _] = contexts.dims();
        let patch_size = self.geometry.patch_size();
        let margin = self.geometry.margin();

        contexts
            .narrow(1, margin, patch_size)
            .narrow(2, margin, patch_size)
            .mean_dim(3)
            .reshape([count, patch_size, patch_size])
    }
}

/// Tile `image` (`[S, S, C]`), run the predictor over batches of at most
/// `batch_size` contexts and reassemble the `[S, S]` prediction.
///
/// # Errors
///
/// Tiling errors from [`PatchTiler::new`], and
/// [`PatchError::TileShapeMismatch`] when the predictor returns maps of the
/// wrong shape.
pub fn predict_image<B: Backend, M: PatchPredictor<B> + ?Sized>(
    predictor: &M,
    image: Tensor<B, 3>,
    geometry: PatchGeometry,
    batch_size: usize,
) -> PatchResult<Tensor<B, 2>> {
    let [side, _, _] = image.dims();
    let tiler = PatchTiler::new(image, geometry)?;
    let batch_size = batch_size.max(1);

    let mut results = Vec::with_capacity(tiler.len());
    let mut chunk = Vec::with_capacity(batch_size);

    for tile in tiler.tiles() {
        chunk.push(tile);
        if chunk.len() == batch_size {
            predict_chunk(predictor, std::mem::take(&mut chunk), geometry, &mut results)?;
        }
    }
    if !chunk.is_empty() {
        predict_chunk(predictor, chunk, geometry, &mut results)?;
    }

    tracing::debug!(tiles = results.len(), side, "reassembling prediction");
    let prediction = reassemble_tiles(results, 1, geometry.patch_size(), side)?;
    Ok(prediction.reshape([side, side]))
}

fn predict_chunk<B: Backend, M: PatchPredictor<B> + ?Sized>(
    predictor: &M,
    chunk: Vec<(TileCoord, Tensor<B, 3>)>,
    geometry: PatchGeometry,
    results: &mut Vec<(TileCoord, Tensor<B, 2>)>,
) -> PatchResult<()> {
    let patch_size = geometry.patch_size();
    let (coords, contexts): (Vec<_>, Vec<_>) = chunk.into_iter().unzip();
    let count = coords.len();

    let maps = predictor.predict(Tensor::stack(contexts, 0));
    let dims = maps.dims();
    if dims != [count, patch_size, patch_size] {
        return Err(PatchError::TileShapeMismatch {
            expected: patch_size,
            actual: dims.to_vec(),
        });
    }

    for (i, coord) in coords.into_iter().enumerate() {
        let map = maps.clone().narrow(0, i, 1).reshape([patch_size, patch_size]);
        results.push((coord, map));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::tests::TestBackend;

    struct ConstantPredictor(usize);

    impl PatchPredictor<TestBackend> for ConstantPredictor {
        fn predict(&self, contexts: Tensor<TestBackend, 4>) -> Tensor<TestBackend, 3> {
            let [count, _, _, _] = contexts.dims();
            Tensor::ones([count, self.0, self.0], &contexts.device())
        }
    }

    fn ramp(side: usize, channels: usize) -> Tensor<TestBackend, 3> {
        let values: Vec<f32> = (0..side * side)
            .flat_map(|i| std::iter::repeat(i as f32).take(channels))
            .collect();
        Tensor::from_data(
            TensorData::new(values, [side, side, channels]),
            &Default::default(),
        )
    }

    #[test]
    fn center_crop_reproduces_the_input() {
        let geometry = PatchGeometry::new(4).unwrap();
        let image = ramp(16, 1);

        for batch_size in [1, 3, 16, 100] {
            let predicted = predict_image(
                &CenterCropPredictor::new(geometry),
                image.clone(),
                geometry,
                batch_size,
            )
            .unwrap();

            assert_eq!(predicted.dims(), [16, 16]);
            let expected: Vec<f32> = image.clone().into_data().to_vec().unwrap();
            let actual: Vec<f32> = predicted.into_data().to_vec().unwrap();
            assert_eq!(actual, expected, "batch size {batch_size}");
        }
    }

    #[test]
    fn center_crop_averages_channels() {
        let geometry = PatchGeometry::new(2).unwrap();
        let values: Vec<f32> = (0..4 * 4).flat_map(|_| [0.0, 0.5, 1.0]).collect();
        let image = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(values, [4, 4, 3]),
            &Default::default(),
        );

        let predicted =
            predict_image(&CenterCropPredictor::new(geometry), image, geometry, 2).unwrap();
        let actual: Vec<f32> = predicted.into_data().to_vec().unwrap();
        assert!(actual.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn predictor_output_shape_is_checked() {
        let geometry = PatchGeometry::new(4).unwrap();
        let err = predict_image(&ConstantPredictor(3), ramp(8, 3), geometry, 2).unwrap_err();
        assert!(matches!(err, PatchError::TileShapeMismatch { expected: 4, .. }));
    }

    #[test]
    fn untileable_images_are_rejected() {
        let geometry = PatchGeometry::new(4).unwrap();
        let err = predict_image(&ConstantPredictor(4), ramp(10, 3), geometry, 2).unwrap_err();
        assert!(matches!(err, PatchError::NotTileable { .. }));
    }
}
