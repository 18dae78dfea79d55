//! Batched grid-sampled arrays.
//!
//! A [`Field`] is the common carrier for image batches, deformation fields
//! and velocity fields. The tensor is stored channel-first with the spatial
//! axes flattened (`[N, C, P]`, `P = shape[0] * ... * shape[D-1]`, row-major)
//! so that one tensor rank serves both 2D and 3D grids.

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};

use crate::error::{ensure_supported_dimension, Result, WarpError};

/// Row-major strides of a grid shape (axis 0 slowest).
pub(crate) fn row_major_strides<const D: usize>(shape: [usize; D]) -> [usize; D] {
    let mut strides = [1usize; D];
    for k in (0..D.saturating_sub(1)).rev() {
        strides[k] = strides[k + 1] * shape[k + 1];
    }
    strides
}

/// Batch of channel-first arrays on a regular `D`-dimensional grid.
///
/// # Type Parameters
/// * `B` - The backend (CPU or GPU) for tensor operations
/// * `D` - The spatial dimensionality (2 or 3)
///
/// # Layout
/// * Images are 1-channel fields `[N, 1, P]`
/// * Deformation and velocity fields are `D`-channel fields `[N, D, P]`,
///   channel `k` holding the coordinate along spatial axis `k`
#[derive(Debug, Clone)]
pub struct Field<B: Backend, const D: usize> {
    data: Tensor<B, 3>,
    shape: [usize; D],
}

impl<B: Backend, const D: usize> Field<B, D> {
    /// Wrap a `[N, C, P]` tensor together with its spatial shape.
    ///
    /// Fails if `D` is not 2 or 3, or if `P` does not equal the product of
    /// `shape`.
    pub fn new(data: Tensor<B, 3>, shape: [usize; D]) -> Result<Self> {
        ensure_supported_dimension(D)?;
        let [_, _, p] = data.dims();
        let expected = shape.iter().product::<usize>();
        if p != expected || expected == 0 {
            return Err(WarpError::shape_mismatch(&shape, &[p]));
        }
        Ok(Self { data, shape })
    }

    /// Build a field from host values laid out as `[N, C, shape...]`.
    pub fn from_floats(
        values: Vec<f32>,
        batch: usize,
        channels: usize,
        shape: [usize; D],
        device: &B::Device,
    ) -> Result<Self> {
        let p = shape.iter().product::<usize>();
        if values.len() != batch * channels * p {
            return Err(WarpError::shape_mismatch(
                &[batch * channels * p],
                &[values.len()],
            ));
        }
        let data = Tensor::<B, 3>::from_data(TensorData::new(values, [batch, channels, p]), device);
        Self::new(data, shape)
    }

    /// Field of zeros.
    pub fn zeros(batch: usize, channels: usize, shape: [usize; D], device: &B::Device) -> Self {
        let p = shape.iter().product::<usize>();
        Self {
            data: Tensor::zeros([batch, channels, p], device),
            shape,
        }
    }

    /// Get the underlying `[N, C, P]` tensor.
    pub fn data(&self) -> &Tensor<B, 3> {
        &self.data
    }

    /// Consume the field and return the underlying tensor.
    pub fn into_tensor(self) -> Tensor<B, 3> {
        self.data
    }

    /// Spatial shape of the grid.
    pub fn shape(&self) -> [usize; D] {
        self.shape
    }

    /// Number of batch entries.
    pub fn batch(&self) -> usize {
        self.data.dims()[0]
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.data.dims()[1]
    }

    /// Number of grid points per channel.
    pub fn num_voxels(&self) -> usize {
        self.data.dims()[2]
    }

    /// Device holding the data.
    pub fn device(&self) -> B::Device {
        self.data.device()
    }

    /// Replace the tensor, keeping the spatial shape.
    pub fn with_tensor(&self, data: Tensor<B, 3>) -> Result<Self> {
        Self::new(data, self.shape)
    }

    /// Apply a voxel-count-preserving tensor operation.
    pub fn map(self, f: impl FnOnce(Tensor<B, 3>) -> Tensor<B, 3>) -> Self {
        let data = f(self.data);
        debug_assert_eq!(data.dims()[2], self.shape.iter().product::<usize>());
        Self {
            data,
            shape: self.shape,
        }
    }

    /// Channel `k` as a `[N, 1, P]` tensor.
    pub fn channel(&self, k: usize) -> Tensor<B, 3> {
        self.data.clone().narrow(1, k, 1)
    }

    /// Require exactly `D` channels (deformation/velocity fields).
    pub fn ensure_vector_field(&self) -> Result<()> {
        if self.channels() != D {
            return Err(WarpError::shape_mismatch(
                &[self.batch(), D, self.num_voxels()],
                &self.data.dims(),
            ));
        }
        Ok(())
    }

    /// Copy the values to the host in `[N, C, P]` order.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.data
            .clone()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| WarpError::sampling(format!("cannot read field data: {err:?}")))
    }
}

impl<B: AutodiffBackend, const D: usize> Field<B, D> {
    /// Lift a field from the inner (non-differentiable) backend.
    pub fn from_inner(inner: Field<B::InnerBackend, D>) -> Self {
        Self {
            data: Tensor::from_inner(inner.data),
            shape: inner.shape,
        }
    }

    /// Drop autodiff tracking and return the inner field.
    pub fn inner(&self) -> Field<B::InnerBackend, D> {
        Field {
            data: self.data.clone().inner(),
            shape: self.shape,
        }
    }

    /// Mark the field as requiring a gradient.
    pub fn require_grad(self) -> Self {
        self.map(|t| t.require_grad())
    }

    /// Gradient of the field with respect to a backward pass, if tracked.
    pub fn grad(&self, grads: &B::Gradients) -> Option<Field<B::InnerBackend, D>> {
        self.data.grad(grads).map(|data| Field {
            data,
            shape: self.shape,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_field_creation() {
        let device = Default::default();
        let field = Field::<TestBackend, 2>::zeros(3, 2, [4, 5], &device);

        assert_eq!(field.batch(), 3);
        assert_eq!(field.channels(), 2);
        assert_eq!(field.num_voxels(), 20);
        assert_eq!(field.shape(), [4, 5]);
        assert!(field.ensure_vector_field().is_ok());
    }

    #[test]
    fn test_field_voxel_count_checked() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 3>::zeros([1, 1, 12], &device);
        assert!(Field::<TestBackend, 2>::new(data.clone(), [3, 4]).is_ok());
        assert!(matches!(
            Field::<TestBackend, 2>::new(data, [3, 5]),
            Err(WarpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_field_unsupported_dimension() {
        let device = Default::default();
        let data = Tensor::<TestBackend, 3>::zeros([1, 1, 16], &device);
        assert_eq!(
            Field::<TestBackend, 4>::new(data, [2, 2, 2, 2]).unwrap_err(),
            WarpError::UnsupportedDimension(4)
        );
    }

    #[test]
    fn test_from_floats_roundtrip_layout() {
        let device = Default::default();
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let field = Field::<TestBackend, 2>::from_floats(values.clone(), 1, 2, [2, 3], &device).unwrap();

        assert_eq!(field.to_vec().unwrap(), values);
        let second = field.channel(1).into_data();
        assert_eq!(second.as_slice::<f32>().unwrap(), &[6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_row_major_strides() {
        assert_eq!(row_major_strides([2, 3, 4]), [12, 4, 1]);
        assert_eq!(row_major_strides([5, 7]), [7, 1]);
    }

    #[test]
    fn test_from_floats_length_checked() {
        let device = Default::default();
        let result = Field::<TestBackend, 2>::from_floats(vec![0.0; 5], 1, 1, [2, 3], &device);
        assert!(result.is_err());
    }
}
