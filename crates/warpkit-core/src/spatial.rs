//! Host-side spatial vectors for grid geometry.
//!
//! Grid origins and spacings are small per-axis quantities that never need
//! gradients, so they live on the host as nalgebra vectors rather than as
//! tensors.

use nalgebra::SVector;

/// A vector in D-dimensional space, one component per spatial axis.
///
/// Component `k` refers to spatial axis `k` in row-major order (axis 0 is
/// the slowest-varying axis of the flattened grid).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector<const D: usize>(pub SVector<f64, D>);

/// A position in D-dimensional index space.
pub type Point<const D: usize> = Vector<D>;

/// Output-grid origin expressed in input index coordinates.
pub type Origin<const D: usize> = Vector<D>;

/// Output voxel step measured in input voxels.
pub type Spacing<const D: usize> = Vector<D>;

impl<const D: usize> Vector<D> {
    /// Create a new vector from components.
    pub fn new(components: [f64; D]) -> Self {
        Self(SVector::from(components))
    }

    /// Create a zero vector.
    pub fn zeros() -> Self {
        Self(SVector::zeros())
    }

    /// Create a vector with the same value on every axis.
    pub fn uniform(value: f64) -> Self {
        Self(SVector::repeat(value))
    }

    /// Index-space centre of a grid: `(n - 1) / 2` per axis.
    pub fn center_of(shape: [usize; D]) -> Self {
        Self::new(shape.map(|n| (n as f64 - 1.0) * 0.5))
    }

    /// Component-wise reciprocal.
    pub fn recip(&self) -> Self {
        Self(self.0.map(|v| 1.0 / v))
    }

    /// Convert to an array of components.
    pub fn to_array(&self) -> [f64; D] {
        std::array::from_fn(|i| self.0[i])
    }

    /// Check if all components are equal.
    pub fn is_uniform(&self) -> bool {
        (1..D).all(|i| (self.0[i] - self.0[0]).abs() < 1e-12)
    }

    /// Get the inner nalgebra vector.
    pub fn inner(&self) -> &SVector<f64, D> {
        &self.0
    }
}

impl<const D: usize> std::ops::Index<usize> for Vector<D> {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<const D: usize> From<[f64; D]> for Vector<D> {
    fn from(components: [f64; D]) -> Self {
        Self::new(components)
    }
}
