//! Sampling of fields at continuous index coordinates.
//!
//! A [`Sampler`] evaluates a source field at positions given by a
//! `D`-channel position field. Channel `k` of the positions is the index
//! coordinate along axis `k` of the source grid; the output lives on the
//! position field's grid. Every channel of the source is sampled at the same
//! positions.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use crate::error::{ensure_supported_dimension, Result, WarpError};
use crate::field::{row_major_strides, Field};
use crate::flow::identity;

/// How a deformation field encodes its sampling positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// Absolute sampling coordinates.
    Position,
    /// Offsets from the identity grid.
    Displacement,
}

/// Value used for positions outside the source grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// Clamp to the nearest edge voxel.
    #[default]
    Border,
    /// Treat everything outside the grid as zero.
    Zero,
}

/// Sampling primitive over a backend.
pub trait Sampler<B: Backend> {
    /// Boundary handling used by [`Sampler::sample`].
    fn boundary(&self) -> Boundary;

    /// Sample `source` at `positions` with explicit boundary handling.
    ///
    /// # Arguments
    /// * `source` - Field `[Ns, C, P_in]`
    /// * `positions` - Field `[Np, D, P_out]` in source index coordinates
    ///
    /// # Returns
    /// Field `[max(Ns, Np), C, P_out]` on the positions' grid. A batch of 1
    /// on either side is broadcast; two different non-unit batches are a
    /// [`WarpError::ShapeMismatch`].
    fn sample_with<const D: usize>(
        &self,
        source: &Field<B, D>,
        positions: &Field<B, D>,
        boundary: Boundary,
    ) -> Result<Field<B, D>>;

    /// Sample `source` at `positions` with this sampler's boundary.
    fn sample<const D: usize>(
        &self,
        source: &Field<B, D>,
        positions: &Field<B, D>,
    ) -> Result<Field<B, D>> {
        self.sample_with(source, positions, self.boundary())
    }

    /// Warp `source` through a deformation `h` given in `convention`.
    fn warp<const D: usize>(
        &self,
        source: &Field<B, D>,
        h: &Field<B, D>,
        convention: Convention,
    ) -> Result<Field<B, D>> {
        match convention {
            Convention::Position => self.sample(source, h),
            Convention::Displacement => {
                h.ensure_vector_field()?;
                let grid = identity::<B, D>(h.batch(), h.shape(), &h.device())?;
                let positions = h.clone().map(|t| t + grid.into_tensor());
                self.sample(source, &positions)
            }
        }
    }
}

/// Repeat the unit-batch side so both tensors share a batch size.
pub(crate) fn broadcast_batch<B: Backend>(
    a: Tensor<B, 3>,
    b: Tensor<B, 3>,
) -> Result<(Tensor<B, 3>, Tensor<B, 3>)> {
    let na = a.dims()[0];
    let nb = b.dims()[0];
    match (na, nb) {
        _ if na == nb => Ok((a, b)),
        (1, n) => Ok((a.repeat_dim(0, n), b)),
        (n, 1) => Ok((a, b.repeat_dim(0, n))),
        _ => Err(WarpError::shape_mismatch(&a.dims(), &b.dims())),
    }
}

/// Lower/upper neighbour indices and weights along one axis.
struct AxisTaps<B: Backend> {
    index: [Tensor<B, 3, Int>; 2],
    weight: [Tensor<B, 3>; 2],
}

/// Linear Interpolator.
///
/// Performs n-linear interpolation (bilinear for 2D, trilinear for 3D) over
/// the `2^D` neighbouring voxels.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearSampler {
    boundary: Boundary,
}

impl LinearSampler {
    /// Create a new linear sampler clamping at the border.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the boundary handling.
    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    fn axis_taps<B: Backend>(&self, coord: Tensor<B, 3>, extent: usize, boundary: Boundary) -> AxisTaps<B> {
        let max = (extent - 1) as f64;
        let x0 = coord.clone().detach().floor();
        let x1 = x0.clone() + 1.0;

        // Compute interpolation weights
        let w1 = coord - x0.clone();
        let w0 = w1.clone().neg() + 1.0;

        let (w0, w1) = match boundary {
            Boundary::Border => (w0, w1),
            Boundary::Zero => {
                let inside = |x: &Tensor<B, 3>| {
                    x.clone().greater_equal_elem(0.0).float() * x.clone().lower_equal_elem(max).float()
                };
                (w0 * inside(&x0), w1 * inside(&x1))
            }
        };

        // Clamp indices to valid range
        AxisTaps {
            index: [x0.clamp(0.0, max).int(), x1.clamp(0.0, max).int()],
            weight: [w0, w1],
        }
    }
}

impl<B: Backend> Sampler<B> for LinearSampler {
    fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn sample_with<const D: usize>(
        &self,
        source: &Field<B, D>,
        positions: &Field<B, D>,
        boundary: Boundary,
    ) -> Result<Field<B, D>> {
        ensure_supported_dimension(D)?;
        positions.ensure_vector_field()?;
        let (data, coords) = broadcast_batch(source.data().clone(), positions.data().clone())?;

        let [n, c, _] = data.dims();
        let p_out = positions.num_voxels();
        let device = data.device();
        let shape = source.shape();
        let strides = row_major_strides(shape);

        let taps: Vec<AxisTaps<B>> = (0..D)
            .map(|k| self.axis_taps(coords.clone().narrow(1, k, 1), shape[k], boundary))
            .collect();

        let mut output = Tensor::<B, 3>::zeros([n, c, p_out], &device);
        for corner in 0..(1usize << D) {
            // Integer offsets: f32 is not exact past 2^24
            let mut flat = Tensor::<B, 3, Int>::zeros([n, 1, p_out], &device);
            let mut weight = Tensor::<B, 3>::ones([n, 1, p_out], &device);
            for (k, tap) in taps.iter().enumerate() {
                let bit = (corner >> (D - 1 - k)) & 1;
                flat = flat + tap.index[bit].clone().mul_scalar(strides[k] as i64);
                weight = weight * tap.weight[bit].clone();
            }
            let values = data.clone().gather(2, flat.repeat_dim(1, c));
            output = output + values * weight.repeat_dim(1, c);
        }

        Field::new(output, positions.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn positions_2d(coords: &[[f32; 2]]) -> Field<TestBackend, 2> {
        // One row of points: shape [1, len]
        let mut values = Vec::with_capacity(coords.len() * 2);
        values.extend(coords.iter().map(|p| p[0]));
        values.extend(coords.iter().map(|p| p[1]));
        Field::from_floats(values, 1, 2, [1, coords.len()], &Default::default()).unwrap()
    }

    fn image_2x2() -> Field<TestBackend, 2> {
        Field::from_floats(vec![0.0, 1.0, 2.0, 3.0], 1, 1, [2, 2], &Default::default()).unwrap()
    }

    #[test]
    fn test_identity_positions_reproduce_source() {
        let device = Default::default();
        let values: Vec<f32> = (0..24).map(|v| (v as f32).sin()).collect();
        let source = Field::<TestBackend, 3>::from_floats(values.clone(), 1, 1, [2, 3, 4], &device).unwrap();
        let grid = identity::<TestBackend, 3>(1, [2, 3, 4], &device).unwrap();

        let sampled = LinearSampler::new().sample(&source, &grid).unwrap();
        for (a, e) in sampled.to_vec().unwrap().iter().zip(values.iter()) {
            assert!((a - e).abs() < 1e-6, "expected {}, got {}", e, a);
        }
    }

    #[test]
    fn test_bilinear_midpoints() {
        let sampled = LinearSampler::new()
            .sample(&image_2x2(), &positions_2d(&[[0.5, 0.5], [0.0, 0.5], [1.0, 0.25]]))
            .unwrap();
        let values = sampled.to_vec().unwrap();
        let expected = [1.5, 0.5, 2.25];
        for (a, e) in values.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-6, "expected {}, got {}", e, a);
        }
    }

    #[test]
    fn test_boundary_modes() {
        let positions = positions_2d(&[[-1.0, 0.0], [-0.5, 0.0], [0.0, 2.0]]);

        let border = LinearSampler::new().sample(&image_2x2(), &positions).unwrap();
        assert_eq!(border.to_vec().unwrap(), vec![0.0, 0.0, 1.0]);

        let image = image_2x2().map(|t| t + 1.0);
        let zero = LinearSampler::new()
            .with_boundary(Boundary::Zero)
            .sample(&image, &positions)
            .unwrap()
            .to_vec()
            .unwrap();
        assert_eq!(zero[0], 0.0);
        assert!((zero[1] - 0.5).abs() < 1e-6, "half-weight edge: got {}", zero[1]);
        assert_eq!(zero[2], 0.0);
    }

    #[test]
    fn test_batch_broadcast() {
        let device = Default::default();
        let positions = Field::<TestBackend, 2>::from_floats(
            vec![0.0, 0.0, 1.0, 1.0],
            2,
            2,
            [1, 1],
            &device,
        )
        .unwrap();
        let sampled = LinearSampler::new().sample(&image_2x2(), &positions).unwrap();
        assert_eq!(sampled.batch(), 2);
        assert_eq!(sampled.to_vec().unwrap(), vec![0.0, 3.0]);

        let source = Field::<TestBackend, 2>::zeros(3, 1, [2, 2], &device);
        assert!(matches!(
            LinearSampler::new().sample(&source, &positions),
            Err(WarpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_flat_index_beyond_f32_precision() {
        let device = Default::default();
        let shape = [3, 1usize << 23];
        let mut values = vec![0.0f32; 3 << 23];
        // Voxel (2, 1) sits at flat index 2^24 + 1
        values[(2 << 23) + 1] = 1.0;
        let source = Field::<TestBackend, 2>::from_floats(values, 1, 1, shape, &device).unwrap();
        let positions = Field::<TestBackend, 2>::from_floats(vec![2.0, 1.0], 1, 2, [1, 1], &device).unwrap();

        let out = LinearSampler::new().sample(&source, &positions).unwrap().to_vec().unwrap();
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn test_positions_need_d_channels() {
        let device = Default::default();
        let positions = Field::<TestBackend, 2>::zeros(1, 3, [2, 2], &device);
        assert!(matches!(
            LinearSampler::new().sample(&image_2x2(), &positions),
            Err(WarpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_displacement_warp_is_identity() {
        let device = Default::default();
        let h = Field::<TestBackend, 2>::zeros(1, 2, [2, 2], &device);
        let warped = LinearSampler::new()
            .warp(&image_2x2(), &h, Convention::Displacement)
            .unwrap();
        assert_eq!(warped.to_vec().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_gradient_with_respect_to_positions() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();
        // Row [0, 2, 4]: slope 2 along axis 1
        let source = Field::<B, 2>::from_floats(vec![0.0, 2.0, 4.0], 1, 1, [1, 3], &device).unwrap();
        let positions = Field::<B, 2>::from_floats(vec![0.0, 0.5], 1, 2, [1, 1], &device)
            .unwrap()
            .require_grad();

        let sampled = LinearSampler::new().sample(&source, &positions).unwrap();
        let grads = sampled.data().clone().sum().backward();
        let grad = positions.grad(&grads).unwrap().to_vec().unwrap();
        assert!((grad[1] - 2.0).abs() < 1e-6, "d/dx expected 2, got {}", grad[1]);
    }
}
