//! Optimizers for the atlas image.
//!
//! The atlas is a burn module with a single image parameter. Its update rule
//! is pluggable through the [`Optimizer`] trait; the wrappers here delegate
//! to burn's optimizers.
//!
//! # Examples
//!
//! ```rust,ignore
//! use warpkit_atlas::optimizer::{AtlasImage, GradientDescent, Optimizer};
//!
//! let mut optimizer = GradientDescent::new(1e5);
//! let atlas = optimizer.step(atlas, atlas_grads);
//! ```

pub mod adam;
pub mod atlas_image;
pub mod gradient_descent;
pub mod momentum;
pub mod trait_;

pub use adam::AdamOptimizer;
pub use atlas_image::AtlasImage;
pub use gradient_descent::GradientDescent;
pub use momentum::Momentum;
pub use trait_::Optimizer;
