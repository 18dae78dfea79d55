//! Affine transform implementation.
//!
//! This module provides a batch of affine maps `x ↦ A·x + T`, one per sample.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{Result, WarpError};
use crate::linalg::{check_square, invert};

/// Check that `translation` is `[n, D]`.
pub(crate) fn check_translation<B: Backend, const D: usize>(
    n: usize,
    translation: &Tensor<B, 2>,
) -> Result<()> {
    let dims = translation.dims();
    if dims != [n, D] {
        return Err(WarpError::shape_mismatch(&[n, D], &dims));
    }
    Ok(())
}

/// Invert a batch of affine maps: `(A, T) ↦ (A⁻¹, −A⁻¹·T)`.
///
/// # Arguments
/// * `matrix` - Tensor of shape `[N, D, D]`
/// * `translation` - Tensor of shape `[N, D]`
pub fn invert_affine<B: Backend, const D: usize>(
    matrix: &Tensor<B, 3>,
    translation: &Tensor<B, 2>,
) -> Result<(Tensor<B, 3>, Tensor<B, 2>)> {
    let n = check_square::<B, D>(matrix)?;
    check_translation::<B, D>(n, translation)?;

    let inverse = invert::<B, D>(matrix)?;
    let shift = inverse
        .clone()
        .matmul(translation.clone().unsqueeze_dim::<3>(2))
        .reshape([n, D])
        .neg();
    Ok((inverse, shift))
}

/// Batch of affine transforms `x ↦ A·x + T`.
///
/// # Type Parameters
/// * `B` - The backend for tensor operations
/// * `D` - The spatial dimensionality (2 or 3)
#[derive(Debug, Clone)]
pub struct AffineBatch<B: Backend, const D: usize> {
    matrix: Tensor<B, 3>,      // [N, D, D]
    translation: Tensor<B, 2>, // [N, D]
}

impl<B: Backend, const D: usize> AffineBatch<B, D> {
    /// Create a new batch from matrices `[N, D, D]` and translations `[N, D]`.
    pub fn new(matrix: Tensor<B, 3>, translation: Tensor<B, 2>) -> Result<Self> {
        let n = check_square::<B, D>(&matrix)?;
        check_translation::<B, D>(n, &translation)?;
        Ok(Self {
            matrix,
            translation,
        })
    }

    /// `n` identity transforms.
    pub fn identity(n: usize, device: &B::Device) -> Self {
        let matrix = Tensor::<B, 2>::eye(D, device)
            .unsqueeze::<3>()
            .repeat_dim(0, n);
        Self {
            matrix,
            translation: Tensor::zeros([n, D], device),
        }
    }

    /// Number of transforms in the batch.
    pub fn len(&self) -> usize {
        self.matrix.dims()[0]
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the linear parts `[N, D, D]`.
    pub fn matrix(&self) -> &Tensor<B, 3> {
        &self.matrix
    }

    /// Get the translations `[N, D]`.
    pub fn translation(&self) -> &Tensor<B, 2> {
        &self.translation
    }

    /// Split into `(matrix, translation)`.
    pub fn into_parts(self) -> (Tensor<B, 3>, Tensor<B, 2>) {
        (self.matrix, self.translation)
    }

    /// Inverse of every transform in the batch.
    pub fn inverse(&self) -> Result<Self> {
        let (matrix, translation) = invert_affine::<B, D>(&self.matrix, &self.translation)?;
        Ok(Self {
            matrix,
            translation,
        })
    }

    /// Composition `self ∘ other`: apply `other` first.
    ///
    /// `(A₁, T₁) ∘ (A₂, T₂) = (A₁A₂, A₁T₂ + T₁)`
    pub fn compose(&self, other: &Self) -> Result<Self> {
        let n = self.len();
        if other.len() != n {
            return Err(WarpError::shape_mismatch(
                &self.matrix.dims(),
                &other.matrix.dims(),
            ));
        }
        let matrix = self.matrix.clone().matmul(other.matrix.clone());
        let translation = self
            .matrix
            .clone()
            .matmul(other.translation.clone().unsqueeze_dim::<3>(2))
            .reshape([n, D])
            + self.translation.clone();
        Ok(Self {
            matrix,
            translation,
        })
    }

    /// Map points `[N, D, P]` (or `[1, D, P]`, shared by every transform).
    pub fn transform_points(&self, points: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let n = self.len();
        let [pn, pd, p] = points.dims();
        if pd != D || (pn != n && pn != 1) {
            return Err(WarpError::shape_mismatch(&[n, D, p], &[pn, pd, p]));
        }
        let points = if pn == n { points } else { points.repeat_dim(0, n) };
        Ok(self.matrix.clone().matmul(points) + self.translation.clone().unsqueeze_dim::<3>(2))
    }
}
