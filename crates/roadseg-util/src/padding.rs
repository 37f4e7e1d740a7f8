//! Reflect padding of the spatial axes of channel-last image tensors.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use crate::image::{ImageError, ImageResult};

/// Map a position on an axis extended in both directions back onto `0..len`
/// by mirroring across the first and last element (the edge is not repeated).
///
/// Positions further out than `len - 1` keep bouncing between the two edges.
pub fn reflect_index(position: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }

    let last = len as isize - 1;
    let period = 2 * last;
    let folded = position.rem_euclid(period);
    if folded <= last {
        folded as usize
    } else {
        (period - folded) as usize
    }
}

/// Height and width axes of a rank-3 `[H, W, C]` or rank-4 `[N, H, W, C]` tensor.
fn spatial_axes(rank: usize) -> ImageResult<(usize, usize)> {
    match rank {
        3 => Ok((0, 1)),
        4 => Ok((1, 2)),
        _ => Err(ImageError::UnsupportedRank { rank }),
    }
}

/// Pad both spatial axes by `margin` on each side, mirroring interior pixels.
///
/// # Errors
///
/// [`ImageError::UnsupportedRank`] when the tensor is neither `[H, W, C]` nor
/// `[N, H, W, C]`, [`ImageError::EmptySpatialAxis`] when a spatial axis has no
/// pixels to mirror.
pub fn pad_reflect<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    margin: usize,
) -> ImageResult<Tensor<B, D>> {
    let (height_axis, width_axis) = spatial_axes(D)?;
    if margin == 0 {
        return Ok(tensor);
    }

    let tensor = pad_axis(tensor, height_axis, margin)?;
    pad_axis(tensor, width_axis, margin)
}

fn pad_axis<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    axis: usize,
    margin: usize,
) -> ImageResult<Tensor<B, D>> {
    let len = tensor.dims()[axis];
    if len == 0 {
        return Err(ImageError::EmptySpatialAxis { axis, margin });
    }

    let indices: Vec<i64> = (0..len + 2 * margin)
        .map(|k| reflect_index(k as isize - margin as isize, len) as i64)
        .collect();
    let count = indices.len();

    let indices = Tensor::<B, 1, Int>::from_data(
        TensorData::new(indices, [count]).convert::<B::IntElem>(),
        &tensor.device(),
    );

    Ok(tensor.select(axis, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn reflect_index_mirrors_without_repeating_edge() {
        let mapped: Vec<usize> = (-3..7).map(|k| reflect_index(k, 4)).collect();
        assert_eq!(mapped, vec![3, 2, 1, 0, 1, 2, 3, 2, 1, 0]);
    }

    #[test]
    fn reflect_index_single_pixel_axis() {
        assert_eq!(reflect_index(-5, 1), 0);
        assert_eq!(reflect_index(5, 1), 0);
    }

    #[test]
    fn pad_reflect_rank3_shape_and_borders() {
        let device = Default::default();
        // 3x3 single-channel image holding 0..9 in raster order.
        let values: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let image =
            Tensor::<TestBackend, 3>::from_data(TensorData::new(values, [3, 3, 1]), &device);

        let padded = pad_reflect(image, 2).unwrap();
        assert_eq!(padded.dims(), [7, 7, 1]);

        let padded = padded.into_data().to_vec::<f32>().unwrap();
        // Row 0 of the padded image mirrors source row 2, column order 2 1 | 0 1 2 | 1 0.
        assert_eq!(&padded[0..7], &[8.0, 7.0, 6.0, 7.0, 8.0, 7.0, 6.0]);
        // Row 2 is the original first row with mirrored borders.
        assert_eq!(&padded[14..21], &[2.0, 1.0, 0.0, 1.0, 2.0, 1.0, 0.0]);
        // Row 3 mirrors source row 1.
        assert_eq!(&padded[21..28], &[5.0, 4.0, 3.0, 4.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn pad_reflect_rank4_pads_only_spatial_axes() {
        let device = Default::default();
        let batch = Tensor::<TestBackend, 4>::ones([2, 5, 6, 3], &device);

        let padded = pad_reflect(batch, 3).unwrap();
        assert_eq!(padded.dims(), [2, 11, 12, 3]);
    }

    #[test]
    fn pad_reflect_margin_wider_than_axis() {
        let device = Default::default();
        let image = Tensor::<TestBackend, 3>::from_floats([[[0.0], [1.0]]], &device);

        let padded = pad_reflect(image, 3).unwrap();
        assert_eq!(padded.dims(), [7, 8, 1]);

        let padded = padded.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&padded[0..8], &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn pad_reflect_rejects_other_ranks() {
        let device = Default::default();
        let flat = Tensor::<TestBackend, 2>::zeros([4, 4], &device);

        assert!(matches!(
            pad_reflect(flat, 1).unwrap_err(),
            ImageError::UnsupportedRank { rank: 2 }
        ));
    }
}
