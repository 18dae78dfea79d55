//! Identity grids and semi-Lagrangian composition of deformations.
//!
//! Deformations are `D`-channel fields in index units. [`compose`] is the
//! building block of velocity-field integration: one step `h ∘ (id + dt·v)`.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::error::{ensure_supported_dimension, Result, WarpError};
use crate::field::{row_major_strides, Field};
use crate::interpolation::{broadcast_batch, Convention, Sampler};

/// Build a `[batch, D, P]` coordinate tensor on the host.
///
/// `coordinate(k, i)` gives channel `k` at a voxel whose index along axis
/// `k` is `i`.
pub(crate) fn coordinate_grid<B: Backend, const D: usize>(
    batch: usize,
    shape: [usize; D],
    coordinate: impl Fn(usize, usize) -> f64,
    device: &B::Device,
) -> Tensor<B, 3> {
    let total = shape.iter().product::<usize>();
    let strides = row_major_strides(shape);

    let mut grid = Vec::with_capacity(D * total);
    for k in 0..D {
        for voxel in 0..total {
            let index = (voxel / strides[k]) % shape[k];
            grid.push(coordinate(k, index) as f32);
        }
    }

    Tensor::<B, 3>::from_data(TensorData::new(grid, [1, D, total]), device).repeat_dim(0, batch)
}

/// Identity deformation: channel `k` at voxel `(i_0, …, i_{D-1})` equals `i_k`.
pub fn identity<B: Backend, const D: usize>(
    batch: usize,
    shape: [usize; D],
    device: &B::Device,
) -> Result<Field<B, D>> {
    ensure_supported_dimension(D)?;
    Field::new(
        coordinate_grid::<B, D>(batch, shape, |_, i| i as f64, device),
        shape,
    )
}

/// Compose a deformation with a small velocity step: `h ∘ (id + dt·v)`.
///
/// The sampling positions are always `x + dt·v(x)`. With
/// [`Convention::Displacement`] the step is added back to the sampled
/// displacement (`h(x + dt·v(x)) + dt·v(x)`); with [`Convention::Position`]
/// the sampled coordinates are the result.
///
/// `h` and `v` must be `D`-channel fields on the same grid. A batch of 1 on
/// either side is broadcast.
pub fn compose<B: Backend, S: Sampler<B>, const D: usize>(
    sampler: &S,
    h: &Field<B, D>,
    v: &Field<B, D>,
    dt: f64,
    convention: Convention,
) -> Result<Field<B, D>> {
    h.ensure_vector_field()?;
    v.ensure_vector_field()?;
    if h.shape() != v.shape() {
        return Err(WarpError::shape_mismatch(&h.shape(), &v.shape()));
    }

    let step = v.clone().map(|t| t.mul_scalar(dt));
    let grid = identity::<B, D>(v.batch(), v.shape(), &v.device())?;
    let positions = step.clone().map(|t| t + grid.into_tensor());
    let sampled = sampler.sample(h, &positions)?;

    match convention {
        Convention::Position => Ok(sampled),
        Convention::Displacement => {
            let (sampled, step) = broadcast_batch(sampled.into_tensor(), step.into_tensor())?;
            Field::new(sampled + step, v.shape())
        }
    }
}
