//! Batched affine and rigid transform algebra.
//!
//! Transforms are stored per sample along a leading batch axis so that a
//! whole population can be composed, inverted and applied in one call.

pub mod affine;
pub mod rigid;

pub use affine::{invert_affine, AffineBatch};
pub use rigid::{invert_rigid, rigid_to_affine, rotation_from_tangent, Tangent};
