//! Image datasets and rank-aware minibatch planning.
//!
//! A dataset hands out batches of same-shaped images by sample id. A
//! [`ShardPlan`] decides which ids a process sees and how they are grouped
//! into minibatches.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use warpkit_core::transform::invert_affine;
use warpkit_core::{apply_affine, Field, Sampler};

use crate::error::{AtlasError, Result};
use crate::population::AffinePopulation;

/// Random-access collection of images on a common grid.
pub trait ImageDataset<B: Backend, const D: usize> {
    /// Number of samples.
    fn len(&self) -> usize;

    /// Whether the dataset has no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spatial shape shared by every sample.
    fn shape(&self) -> [usize; D];

    /// Images for `ids`, stacked as `[ids.len(), C, P]`.
    fn batch(&self, ids: &[usize]) -> Result<Field<B, D>>;
}

/// A dataset held entirely in one field.
#[derive(Debug, Clone)]
pub struct InMemoryDataset<B: Backend, const D: usize> {
    images: Field<B, D>,
}

impl<B: Backend, const D: usize> InMemoryDataset<B, D> {
    /// Wrap a `[N, C, P]` field; every batch entry is one sample.
    pub fn new(images: Field<B, D>) -> Result<Self> {
        if images.batch() == 0 {
            return Err(AtlasError::dataset("dataset must be non-empty"));
        }
        Ok(Self { images })
    }

    /// All samples as one field.
    pub fn images(&self) -> &Field<B, D> {
        &self.images
    }
}

impl<B: Backend, const D: usize> ImageDataset<B, D> for InMemoryDataset<B, D> {
    fn len(&self) -> usize {
        self.images.batch()
    }

    fn shape(&self) -> [usize; D] {
        self.images.shape()
    }

    fn batch(&self, ids: &[usize]) -> Result<Field<B, D>> {
        if let Some(id) = ids.iter().find(|&&i| i >= self.len()) {
            return Err(AtlasError::dataset(format!(
                "sample {} out of range for dataset of {}",
                id,
                self.len()
            )));
        }
        let device = self.images.device();
        let indices: Vec<i64> = ids.iter().map(|&i| i as i64).collect();
        let indices = Tensor::<B, 1, Int>::from_data(TensorData::new(indices, [ids.len()]), &device);
        let selected = self.images.data().clone().select(0, indices);
        Ok(self.images.with_tensor(selected)?)
    }
}

/// A dataset viewed through the inverse of each sample's affine transform.
///
/// Sample `i` is returned as `J_i((A_i + I)⁻¹·x − (A_i + I)⁻¹·T_i)`, i.e.
/// mapped back into the atlas frame.
pub struct StandardizedDataset<Ds, S, const D: usize> {
    inner: Ds,
    population: AffinePopulation<D>,
    sampler: S,
}

impl<Ds, S, const D: usize> StandardizedDataset<Ds, S, D> {
    /// View `inner` through the inverse transforms of `population`.
    pub fn new(inner: Ds, population: AffinePopulation<D>, sampler: S) -> Self {
        Self {
            inner,
            population,
            sampler,
        }
    }
}

impl<B, Ds, S, const D: usize> ImageDataset<B, D> for StandardizedDataset<Ds, S, D>
where
    B: Backend,
    Ds: ImageDataset<B, D>,
    S: Sampler<B>,
{
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn shape(&self) -> [usize; D] {
        self.inner.shape()
    }

    fn batch(&self, ids: &[usize]) -> Result<Field<B, D>> {
        let images = self.inner.batch(ids)?;
        let device = images.device();
        let (a, t) = self.population.read::<B>(ids, &device)?;
        let eye = Tensor::<B, 2>::eye(D, &device)
            .unsqueeze::<3>()
            .repeat_dim(0, ids.len());
        let (a_inv, t_inv) = invert_affine::<B, D>(&(a + eye), &t)?;
        Ok(apply_affine(&self.sampler, &images, &a_inv, &t_inv)?)
    }
}

/// The sample ids one rank processes, grouped into minibatches.
///
/// Ranks take strided shards (`rank, rank + W, rank + 2W, …`) in order;
/// there is no shuffling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    ids: Vec<usize>,
    batch_size: usize,
}

impl ShardPlan {
    /// Plan the shard of `rank` out of `world_size` ranks.
    ///
    /// Fails if ranks would see different numbers of minibatches, since every
    /// rank must join the same number of collective operations.
    pub fn new(len: usize, batch_size: usize, rank: usize, world_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(AtlasError::invalid_configuration("batch size must be positive"));
        }
        if world_size == 0 || rank >= world_size {
            return Err(AtlasError::invalid_configuration(format!(
                "rank {} invalid for world size {}",
                rank, world_size
            )));
        }
        if len == 0 {
            return Err(AtlasError::dataset("dataset must be non-empty"));
        }

        let smallest = len / world_size;
        let largest = len.div_ceil(world_size);
        if smallest == 0 {
            return Err(AtlasError::invalid_configuration(format!(
                "{} samples cannot give each of {} ranks a sample; use a world size of at most {}",
                len, world_size, len
            )));
        }
        if smallest.div_ceil(batch_size) != largest.div_ceil(batch_size) {
            // Shards differ by one sample, so counts agree unless the batch size divides the smaller one
            let suggestion = (2..=largest).find(|b| smallest % b != 0).unwrap_or(largest);
            return Err(AtlasError::invalid_configuration(format!(
                "{} samples over {} ranks gives shards of {} and {}, which batch size {} splits into \
                 different minibatch counts; use a batch size that does not divide {} (e.g. {}) \
                 or a world size that divides {}",
                len, world_size, smallest, largest, batch_size, smallest, suggestion, len
            )));
        }

        Ok(Self {
            ids: (rank..len).step_by(world_size).collect(),
            batch_size,
        })
    }

    /// Plan a single-process pass over every sample.
    pub fn single(len: usize, batch_size: usize) -> Result<Self> {
        Self::new(len, batch_size, 0, 1)
    }

    /// Sample ids of this shard, in processing order.
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// Number of minibatches.
    pub fn num_batches(&self) -> usize {
        self.ids.len().div_ceil(self.batch_size)
    }

    /// Minibatches in order; the last one may be short.
    pub fn batches(&self) -> impl Iterator<Item = &[usize]> {
        self.ids.chunks(self.batch_size)
    }
}
