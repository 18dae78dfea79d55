//! Rigid transform implementation.
//!
//! Rotations are parametrised by a tangent vector of the rotation group and
//! mapped to matrices through the exponential map. In 2D the tangent is one
//! angle per sample; the 3D axis-angle form is accepted as a type but its
//! exponential map is not provided.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::affine::{check_translation, AffineBatch};
use crate::error::{Result, WarpError};

/// Tangent vector of the rotation group, one per sample.
#[derive(Debug, Clone)]
pub enum Tangent<B: Backend> {
    /// 2D: one angle (radians) per sample, shape `[N]`.
    Planar(Tensor<B, 1>),
    /// 3D: axis-angle vector per sample, shape `[N, 3]`.
    AxisAngle(Tensor<B, 2>),
}

impl<B: Backend> Tangent<B> {
    /// Zero rotation for `n` planar samples.
    pub fn zeros_planar(n: usize, device: &B::Device) -> Self {
        Self::Planar(Tensor::zeros([n], device))
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            Self::Planar(v) => v.dims()[0],
            Self::AxisAngle(v) => v.dims()[0],
        }
    }

    /// Whether there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spatial dimension the tangent rotates.
    pub fn dimension(&self) -> usize {
        match self {
            Self::Planar(_) => 2,
            Self::AxisAngle(_) => 3,
        }
    }

    /// Tangent of the inverse rotation.
    pub fn neg(&self) -> Self {
        match self {
            Self::Planar(v) => Self::Planar(v.clone().neg()),
            Self::AxisAngle(v) => Self::AxisAngle(v.clone().neg()),
        }
    }
}

/// Rotation matrices `[N, d, d]` for a batch of tangent vectors.
///
/// Planar: `[[cos v, -sin v], [sin v, cos v]]`.
///
/// # Errors
/// [`WarpError::Unimplemented`] for [`Tangent::AxisAngle`].
pub fn rotation_from_tangent<B: Backend>(tangent: &Tangent<B>) -> Result<Tensor<B, 3>> {
    match tangent {
        Tangent::Planar(v) => {
            let n = v.dims()[0];
            let c = v.clone().cos();
            let s = v.clone().sin();
            Ok(Tensor::stack::<2>(vec![c.clone(), s.clone().neg(), s, c], 1).reshape([n, 2, 2]))
        }
        Tangent::AxisAngle(_) => Err(WarpError::unimplemented(
            "rotation from a 3D axis-angle tangent",
        )),
    }
}

/// Invert a batch of rigid transforms: `(v, T) ↦ (−v, −R(−v)·T)`.
pub fn invert_rigid<B: Backend>(
    tangent: &Tangent<B>,
    translation: &Tensor<B, 2>,
) -> Result<(Tangent<B>, Tensor<B, 2>)> {
    let inverse = tangent.neg();
    let rotation = rotation_from_tangent(&inverse)?;
    let n = tangent.len();
    let d = tangent.dimension();
    let dims = translation.dims();
    if dims != [n, d] {
        return Err(WarpError::shape_mismatch(&[n, d], &dims));
    }
    let shift = rotation
        .matmul(translation.clone().unsqueeze_dim::<3>(2))
        .reshape([n, d])
        .neg();
    Ok((inverse, shift))
}

/// Express a batch of rigid transforms `x ↦ R(v)·x + T` as affine maps.
pub fn rigid_to_affine<B: Backend, const D: usize>(
    tangent: &Tangent<B>,
    translation: Tensor<B, 2>,
) -> Result<AffineBatch<B, D>> {
    let rotation = rotation_from_tangent(tangent)?;
    if tangent.dimension() != D {
        return Err(WarpError::invalid_configuration(format!(
            "{}D tangent used for a {}D transform",
            tangent.dimension(),
            D
        )));
    }
    check_translation::<B, D>(tangent.len(), &translation)?;
    AffineBatch::new(rotation, translation)
}
