//! Affine atlas construction.
//!
//! Fits a shared atlas image and one affine transform per sample by
//! alternating gradient steps, optionally across several ranks that each
//! own a shard of the dataset.

pub mod atlas;
pub mod average;
pub mod config;
pub mod dataset;
pub mod distributed;
pub mod error;
pub mod optimizer;
pub mod population;

pub use atlas::{AtlasFit, AtlasFitter};
pub use average::{accumulate_shard, batch_average, StreamingMean};
pub use config::AtlasConfig;
pub use dataset::{ImageDataset, InMemoryDataset, ShardPlan, StandardizedDataset};
pub use distributed::{LocalProcessGroup, ProcessGroup, SingleProcess};
pub use error::{AtlasError, Result};
pub use population::AffinePopulation;
