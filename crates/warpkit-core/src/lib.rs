pub mod error;
pub mod field;
pub mod flow;
pub mod grid;
pub mod interpolation;
pub mod linalg;
pub mod spatial;
pub mod transform;
pub mod warp;

pub use error::{Result, WarpError};
pub use field::Field;
pub use flow::{compose, identity};
pub use grid::{regrid, GridGeometry, GridSpec, PerAxis, Regrid, RegridContext};
pub use interpolation::{Boundary, Convention, LinearSampler, Sampler};
pub use spatial::{Origin, Point, Spacing, Vector};
pub use transform::{invert_affine, invert_rigid, rigid_to_affine, rotation_from_tangent, AffineBatch, Tangent};
pub use warp::{apply_affine, AffineInterp, AffineInterpContext, AffineInterpGrads, NeedsGrad};
