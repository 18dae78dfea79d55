//! Affine warping of images.
//!
//! Images are warped in a centred frame: voxel `i` sits at
//! `x_k = i_k − (n_k − 1)/2`, so `A = I, T = 0` is the identity and
//! rotations turn about the grid centre. Samples that land outside the grid
//! read zero.

use std::marker::PhantomData;

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

use crate::error::{Result, WarpError};
use crate::field::Field;
use crate::flow::coordinate_grid;
use crate::interpolation::{Boundary, Sampler};
use crate::spatial::Vector;
use crate::transform::AffineBatch;

/// Evaluate `I(A·x + T)` on `I`'s grid for every transform in the batch.
///
/// # Arguments
/// * `image` - Field `[1, C, P]` (shared by all transforms) or `[N, C, P]`
/// * `matrix` - Tensor `[N, D, D]`
/// * `translation` - Tensor `[N, D]`
///
/// # Returns
/// Field `[N, C, P]`
pub fn apply_affine<B: Backend, S: Sampler<B>, const D: usize>(
    sampler: &S,
    image: &Field<B, D>,
    matrix: &Tensor<B, 3>,
    translation: &Tensor<B, 2>,
) -> Result<Field<B, D>> {
    let transform = AffineBatch::<B, D>::new(matrix.clone(), translation.clone())?;
    let n = transform.len();
    if image.batch() != 1 && image.batch() != n {
        return Err(WarpError::shape_mismatch(
            &[n, image.channels(), image.num_voxels()],
            &image.data().dims(),
        ));
    }

    let device = image.device();
    let shape = image.shape();
    let p = image.num_voxels();
    let center = Vector::center_of(shape).to_array();

    let points = coordinate_grid::<B, D>(1, shape, |k, i| i as f64 - center[k], &device);
    let offset = Tensor::<B, 1>::from_floats(center.map(|c| c as f32).as_slice(), &device)
        .reshape([1, D, 1])
        .repeat(&[n, 1, p]);
    let positions = transform.transform_points(points)? + offset;

    sampler.sample_with(image, &Field::new(positions, shape)?, Boundary::Zero)
}

/// Which inputs of [`AffineInterp`] need a gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NeedsGrad {
    pub image: bool,
    pub matrix: bool,
    pub translation: bool,
}

impl NeedsGrad {
    /// Gradients for every input.
    pub fn all() -> Self {
        Self {
            image: true,
            matrix: true,
            translation: true,
        }
    }

    fn any(&self) -> bool {
        self.image || self.matrix || self.translation
    }
}

/// Inputs saved by [`AffineInterp::forward`].
#[derive(Debug, Clone)]
pub struct AffineInterpContext<B: Backend, const D: usize> {
    image: Field<B, D>,
    matrix: Tensor<B, 3>,
    translation: Tensor<B, 2>,
}

/// Gradients returned by [`AffineInterp::backward`], `None` where not requested.
#[derive(Debug, Clone)]
pub struct AffineInterpGrads<B: Backend, const D: usize> {
    pub image: Option<Field<B, D>>,
    pub matrix: Option<Tensor<B, 3>>,
    pub translation: Option<Tensor<B, 2>>,
}

/// Explicit forward/backward pair for [`apply_affine`].
///
/// The forward pass runs on the inner backend and keeps `(I, A, T)`; the
/// backward pass replays the warp under autodiff with gradients enabled
/// only for the requested inputs and returns the vector-Jacobian product.
#[derive(Debug, Clone)]
pub struct AffineInterp<B: AutodiffBackend, S> {
    sampler: S,
    _backend: PhantomData<B>,
}

impl<B, S> AffineInterp<B, S>
where
    B: AutodiffBackend,
    S: Sampler<B> + Sampler<B::InnerBackend>,
{
    /// Create a new operation around a sampler.
    pub fn new(sampler: S) -> Self {
        Self {
            sampler,
            _backend: PhantomData,
        }
    }

    /// Warp and capture the inputs for [`AffineInterp::backward`].
    pub fn forward<const D: usize>(
        &self,
        image: &Field<B::InnerBackend, D>,
        matrix: &Tensor<B::InnerBackend, 3>,
        translation: &Tensor<B::InnerBackend, 2>,
    ) -> Result<(Field<B::InnerBackend, D>, AffineInterpContext<B::InnerBackend, D>)> {
        let output = apply_affine(&self.sampler, image, matrix, translation)?;
        let ctx = AffineInterpContext {
            image: image.clone(),
            matrix: matrix.clone(),
            translation: translation.clone(),
        };
        Ok((output, ctx))
    }

    /// Vector-Jacobian product of the warp with `grad_output`.
    pub fn backward<const D: usize>(
        &self,
        ctx: &AffineInterpContext<B::InnerBackend, D>,
        grad_output: &Field<B::InnerBackend, D>,
        needs: NeedsGrad,
    ) -> Result<AffineInterpGrads<B::InnerBackend, D>> {
        let mut grads = AffineInterpGrads {
            image: None,
            matrix: None,
            translation: None,
        };
        if !needs.any() {
            return Ok(grads);
        }

        let mut image = Field::<B, D>::from_inner(ctx.image.clone());
        let mut matrix = Tensor::<B, 3>::from_inner(ctx.matrix.clone());
        let mut translation = Tensor::<B, 2>::from_inner(ctx.translation.clone());
        if needs.image {
            image = image.require_grad();
        }
        if needs.matrix {
            matrix = matrix.require_grad();
        }
        if needs.translation {
            translation = translation.require_grad();
        }

        let output = apply_affine(&self.sampler, &image, &matrix, &translation)?;
        if output.data().dims() != grad_output.data().dims() {
            return Err(WarpError::shape_mismatch(
                &output.data().dims(),
                &grad_output.data().dims(),
            ));
        }
        let backward = (output.into_tensor() * Tensor::from_inner(grad_output.data().clone()))
            .sum()
            .backward();

        if needs.image {
            grads.image = image.grad(&backward);
        }
        if needs.matrix {
            grads.matrix = matrix.grad(&backward);
        }
        if needs.translation {
            grads.translation = translation.grad(&backward);
        }
        Ok(grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolation::LinearSampler;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;
    type AutodiffBackendImpl = Autodiff<NdArray<f32>>;

    fn ramp(shape: [usize; 2]) -> Field<TestBackend, 2> {
        let p = shape[0] * shape[1];
        let values = (0..p).map(|v| v as f32).collect();
        Field::from_floats(values, 1, 1, shape, &Default::default()).unwrap()
    }

    #[test]
    fn test_identity_warp() {
        let device = Default::default();
        let image = ramp([3, 4]);
        let matrix = Tensor::<TestBackend, 2>::eye(2, &device).unsqueeze::<3>();
        let translation = Tensor::<TestBackend, 2>::zeros([1, 2], &device);

        let warped = apply_affine(&LinearSampler::new(), &image, &matrix, &translation).unwrap();
        assert_eq!(warped.to_vec().unwrap(), image.to_vec().unwrap());
    }

    #[test]
    fn test_translation_reads_shifted_with_zero_fill() {
        let device = Default::default();
        let image = ramp([1, 4]).map(|t| t + 1.0);
        let matrix = Tensor::<TestBackend, 2>::eye(2, &device).unsqueeze::<3>();
        let translation = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0]], &device);

        let warped = apply_affine(&LinearSampler::new(), &image, &matrix, &translation).unwrap();
        assert_eq!(warped.to_vec().unwrap(), vec![2.0, 3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_half_turn_about_centre() {
        let device = Default::default();
        let image = ramp([3, 3]);
        let matrix = (Tensor::<TestBackend, 2>::eye(2, &device) * -1.0).unsqueeze::<3>();
        let translation = Tensor::<TestBackend, 2>::zeros([1, 2], &device);

        let warped = apply_affine(&LinearSampler::new(), &image, &matrix, &translation).unwrap();
        let values = warped.to_vec().unwrap();
        let expected: Vec<f32> = (0..9).rev().map(|v| v as f32).collect();
        for (a, e) in values.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-5, "expected {}, got {}", e, a);
        }
    }

    #[test]
    fn test_image_broadcast_over_transforms() {
        let device = Default::default();
        let image = ramp([2, 2]);
        let matrix = Tensor::<TestBackend, 2>::eye(2, &device)
            .unsqueeze::<3>()
            .repeat_dim(0, 3);
        let translation = Tensor::<TestBackend, 2>::zeros([3, 2], &device);

        let warped = apply_affine(&LinearSampler::new(), &image, &matrix, &translation).unwrap();
        assert_eq!(warped.batch(), 3);

        let images = Field::<TestBackend, 2>::zeros(2, 1, [2, 2], &device);
        assert!(matches!(
            apply_affine(&LinearSampler::new(), &images, &matrix, &translation),
            Err(WarpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_backward_matches_direct_autodiff() {
        let device = Default::default();
        let op = AffineInterp::<AutodiffBackendImpl, LinearSampler>::new(LinearSampler::new());

        let values: Vec<f32> = (0..25).map(|v| ((v as f32) * 0.4).sin()).collect();
        let image = Field::<TestBackend, 2>::from_floats(values, 1, 1, [5, 5], &device).unwrap();
        let matrix = Tensor::<TestBackend, 3>::from_floats([[[1.1, 0.1], [-0.05, 0.9]]], &device);
        let translation = Tensor::<TestBackend, 2>::from_floats([[0.3, -0.2]], &device);

        let (output, ctx) = op.forward(&image, &matrix, &translation).unwrap();
        let grad_output = output.clone().map(|t| t.ones_like());
        let grads = op.backward(&ctx, &grad_output, NeedsGrad::all()).unwrap();

        // Direct: d/dθ Σ I(Aθ x + Tθ)
        let image_ad = Field::<AutodiffBackendImpl, 2>::from_inner(image.clone()).require_grad();
        let matrix_ad = Tensor::<AutodiffBackendImpl, 3>::from_inner(matrix.clone()).require_grad();
        let translation_ad = Tensor::<AutodiffBackendImpl, 2>::from_inner(translation.clone()).require_grad();
        let direct = apply_affine(&LinearSampler::new(), &image_ad, &matrix_ad, &translation_ad)
            .unwrap()
            .into_tensor()
            .sum()
            .backward();

        let pairs = [
            (
                grads.matrix.unwrap().into_data(),
                matrix_ad.grad(&direct).unwrap().into_data(),
            ),
            (
                grads.translation.unwrap().into_data(),
                translation_ad.grad(&direct).unwrap().into_data(),
            ),
            (
                grads.image.unwrap().into_tensor().into_data(),
                image_ad.grad(&direct).unwrap().into_tensor().into_data(),
            ),
        ];
        for (replayed, direct) in pairs.iter() {
            let replayed = replayed.as_slice::<f32>().unwrap();
            let direct = direct.as_slice::<f32>().unwrap();
            for (a, b) in replayed.iter().zip(direct.iter()) {
                assert!((a - b).abs() < 1e-5, "replayed {} vs direct {}", a, b);
            }
        }
    }

    #[test]
    fn test_backward_honours_needs_grad() {
        let device = Default::default();
        let op = AffineInterp::<AutodiffBackendImpl, LinearSampler>::new(LinearSampler::new());
        let image = ramp([4, 4]);
        let matrix = Tensor::<TestBackend, 2>::eye(2, &device).unsqueeze::<3>();
        let translation = Tensor::<TestBackend, 2>::from_floats([[0.25, 0.5]], &device);

        let (output, ctx) = op.forward(&image, &matrix, &translation).unwrap();
        let grad_output = output.map(|t| t.ones_like());

        let grads = op
            .backward(
                &ctx,
                &grad_output,
                NeedsGrad {
                    translation: true,
                    ..NeedsGrad::default()
                },
            )
            .unwrap();
        assert!(grads.image.is_none());
        assert!(grads.matrix.is_none());
        assert_eq!(grads.translation.unwrap().dims(), [1, 2]);

        let grads = op.backward(&ctx, &grad_output, NeedsGrad::default()).unwrap();
        assert!(grads.image.is_none() && grads.matrix.is_none() && grads.translation.is_none());
    }
}
