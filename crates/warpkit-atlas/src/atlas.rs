//! Joint estimation of an atlas image and per-sample affine transforms.
//!
//! The fit alternates between two kinds of updates. Every minibatch takes
//! `affine_steps` gradient steps on the affine parameters of its samples,
//! with the atlas held fixed. The atlas gradient of the last of those steps
//! is accumulated, and every `image_update_freq` minibatches (or once per
//! epoch) the accumulated gradient is averaged across ranks and handed to
//! the image optimizer.
//!
//! # Examples
//!
//! ```rust,ignore
//! use warpkit_atlas::{AffinePopulation, AtlasConfig, AtlasFitter, InMemoryDataset};
//!
//! let config = AtlasConfig::new().with_num_epochs(50).with_batch_size(8);
//! let mut fitter = AtlasFitter::<Backend, _, _, 3>::from_config(config)?;
//! let mut population = AffinePopulation::zeros(dataset.len());
//! let fit = fitter.fit(&dataset, &mut population, None, &device)?;
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor, TensorData};
use tracing::{debug, info};
use warpkit_core::{apply_affine, Field, LinearSampler, Sampler};

use crate::average::{accumulate_shard, mean_to_field};
use crate::config::AtlasConfig;
use crate::dataset::{ImageDataset, ShardPlan};
use crate::distributed::{ProcessGroup, SingleProcess};
use crate::error::{AtlasError, Result};
use crate::optimizer::{AtlasImage, GradientDescent, Optimizer};
use crate::population::AffinePopulation;

type Inner<B> = <B as AutodiffBackend>::InnerBackend;

/// Result of a fit.
#[derive(Debug, Clone)]
pub struct AtlasFit<B: Backend, const D: usize> {
    /// Final atlas image `[1, C, P]`.
    pub atlas: Field<B, D>,
    /// Loss summed over each epoch, across all ranks.
    pub epoch_losses: Vec<f64>,
    /// Loss of every affine step on this rank, scaled by `n / len(dataset)`.
    pub iter_losses: Vec<f64>,
    /// Atlas updates taken in each epoch.
    pub image_steps: Vec<usize>,
}

/// Loss and atlas gradient of one minibatch.
struct MinibatchOutcome<B: Backend> {
    loss: f64,
    atlas_grad: Tensor<B, 3>,
}

/// Alternating optimizer for an atlas and an [`AffinePopulation`].
pub struct AtlasFitter<B, O, S, const D: usize>
where
    B: AutodiffBackend,
{
    config: AtlasConfig,
    optimizer: O,
    sampler: S,
    group: Arc<dyn ProcessGroup>,
    _backend: PhantomData<B>,
}

impl<B, const D: usize> AtlasFitter<B, GradientDescent<AtlasImage<B>, B>, LinearSampler, D>
where
    B: AutodiffBackend,
{
    /// Plain gradient descent on the atlas with `learning_rate_i`, linear sampling.
    pub fn from_config(config: AtlasConfig) -> Result<Self> {
        let optimizer = GradientDescent::new(config.learning_rate_i);
        Self::new(config, optimizer, LinearSampler::new())
    }
}

impl<B, O, S, const D: usize> AtlasFitter<B, O, S, D>
where
    B: AutodiffBackend,
    O: Optimizer<AtlasImage<B>, B>,
    S: Sampler<B>,
{
    /// Create a fitter for a single process.
    pub fn new(config: AtlasConfig, optimizer: O, sampler: S) -> Result<Self> {
        warpkit_core::error::ensure_supported_dimension(D)?;
        config.validate()?;
        Ok(Self {
            config,
            optimizer,
            sampler,
            group: Arc::new(SingleProcess),
            _backend: PhantomData,
        })
    }

    /// Run as one rank of `group`.
    pub fn with_process_group(mut self, group: Arc<dyn ProcessGroup>) -> Self {
        self.group = group;
        self
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Fit the atlas and the affine parameters of `population`.
    ///
    /// `population` must have one entry per dataset sample and is updated in
    /// place. Without an `initial` atlas the fit starts from the dataset
    /// mean.
    pub fn fit<Ds>(
        &mut self,
        dataset: &Ds,
        population: &mut AffinePopulation<D>,
        initial: Option<Field<Inner<B>, D>>,
        device: &B::Device,
    ) -> Result<AtlasFit<Inner<B>, D>>
    where
        Ds: ImageDataset<Inner<B>, D>,
    {
        if population.len() != dataset.len() {
            return Err(AtlasError::shape_mismatch(&[dataset.len()], &[population.len()]));
        }
        let rank = self.group.rank();
        let world = self.group.world_size();
        let plan = ShardPlan::new(dataset.len(), self.config.batch_size, rank, world)?;

        let initial = match initial {
            Some(image) => {
                if image.batch() != 1 || image.shape() != dataset.shape() {
                    let mut expected = vec![1];
                    expected.extend(dataset.shape());
                    let mut actual = vec![image.batch()];
                    actual.extend(image.shape());
                    return Err(AtlasError::shape_mismatch(&expected, &actual));
                }
                image
            }
            None => self.initial_atlas(dataset, &plan, device)?,
        };
        let mut atlas = AtlasImage::<B>::new(Tensor::from_inner(initial.into_tensor()));

        if rank == 0 {
            info!(
                "Fitting atlas to {} samples over {} ranks: {} epochs, {} minibatches per epoch",
                dataset.len(),
                world,
                self.config.num_epochs,
                plan.num_batches()
            );
        }

        let freq = self.config.image_update_freq;
        let mut epoch_losses = Vec::with_capacity(self.config.num_epochs);
        let mut iter_losses = Vec::new();
        let mut image_steps = Vec::with_capacity(self.config.num_epochs);

        for epoch in 0..self.config.num_epochs {
            let mut epoch_loss = 0.0;
            let mut pending_loss = 0.0;
            let mut accumulated = 0;
            let mut atlas_grad: Option<Tensor<Inner<B>, 3>> = None;
            let mut steps = 0;

            for (index, ids) in plan.batches().enumerate() {
                let outcome = self.fit_minibatch(dataset, population, &atlas, ids, &mut iter_losses, device)?;
                debug!("Epoch {} minibatch {}: loss {:.6e}", epoch, index, outcome.loss);

                pending_loss += outcome.loss;
                accumulated += 1;
                atlas_grad = Some(match atlas_grad.take() {
                    Some(sum) => sum + outcome.atlas_grad,
                    None => outcome.atlas_grad,
                });

                if freq > 0 && accumulated == freq {
                    if let Some(grad) = atlas_grad.take() {
                        let (next, reduced) = self.atlas_step(atlas, grad, pending_loss, accumulated)?;
                        atlas = next;
                        epoch_loss += reduced;
                        pending_loss = 0.0;
                        accumulated = 0;
                        steps += 1;
                    }
                }
            }

            if let Some(grad) = atlas_grad.take() {
                let (next, reduced) = self.atlas_step(atlas, grad, pending_loss, accumulated)?;
                atlas = next;
                epoch_loss += reduced;
                steps += 1;
            }

            if rank == 0 {
                info!("Epoch {}: loss {:.6e}, {} atlas steps", epoch, epoch_loss, steps);
            }
            epoch_losses.push(epoch_loss);
            image_steps.push(steps);
        }

        if rank == 0 {
            info!(
                "Atlas fit finished with loss {:.6e}",
                epoch_losses.last().copied().unwrap_or_default()
            );
        }

        let shape = dataset.shape();
        Ok(AtlasFit {
            atlas: Field::new(atlas.image().inner(), shape)?,
            epoch_losses,
            iter_losses,
            image_steps,
        })
    }

    /// Affine steps on one minibatch; returns its normalised loss and the
    /// atlas gradient of the final step.
    fn fit_minibatch<Ds>(
        &self,
        dataset: &Ds,
        population: &mut AffinePopulation<D>,
        atlas: &AtlasImage<B>,
        ids: &[usize],
        iter_losses: &mut Vec<f64>,
        device: &B::Device,
    ) -> Result<MinibatchOutcome<Inner<B>>>
    where
        Ds: ImageDataset<Inner<B>, D>,
    {
        let n = ids.len();
        let shape = dataset.shape();
        let voxels = shape.iter().product::<usize>() as f64;
        let share = n as f64 / dataset.len() as f64;

        let targets = Tensor::<B, 3>::from_inner(dataset.batch(ids)?.into_tensor());
        let (mut matrix, mut translation) = population.read::<Inner<B>>(ids, device)?;
        let eye = Tensor::<B, 2>::eye(D, device).unsqueeze::<3>().repeat_dim(0, n);
        let atlas_values = atlas.image().inner();

        let mut outcome = None;
        for step in 0..self.config.affine_steps {
            let last = step + 1 == self.config.affine_steps;

            let a = Tensor::<B, 3>::from_inner(matrix.clone()).require_grad();
            let t = Tensor::<B, 2>::from_inner(translation.clone()).require_grad();
            let mut image = Tensor::<B, 3>::from_inner(atlas_values.clone());
            if last {
                image = image.require_grad();
            }

            let warped = apply_affine(
                &self.sampler,
                &Field::new(image.clone(), shape)?,
                &(a.clone() + eye.clone()),
                &t,
            )?;
            let mut loss = (warped.into_tensor() - targets.clone())
                .powf_scalar(2.0)
                .sum()
                .div_scalar(voxels);
            if self.config.reg_weight_a > 0.0 {
                loss = loss + a.clone().powf_scalar(2.0).sum().mul_scalar(0.5 * self.config.reg_weight_a);
            }
            if self.config.reg_weight_t > 0.0 {
                loss = loss + t.clone().powf_scalar(2.0).sum().mul_scalar(0.5 * self.config.reg_weight_t);
            }
            let loss = loss.div_scalar(n as f64);

            let value = loss.clone().into_scalar().elem::<f64>() * share;
            iter_losses.push(value);

            let grads = loss.backward();
            let grad_a = a
                .grad(&grads)
                .ok_or_else(|| AtlasError::invalid_configuration("no gradient reached the affine matrices"))?;
            let grad_t = t
                .grad(&grads)
                .ok_or_else(|| AtlasError::invalid_configuration("no gradient reached the translations"))?;
            if last {
                let atlas_grad = image
                    .grad(&grads)
                    .ok_or_else(|| AtlasError::invalid_configuration("no gradient reached the atlas"))?;
                outcome = Some(MinibatchOutcome {
                    loss: value,
                    atlas_grad,
                });
            }

            matrix = matrix - grad_a.mul_scalar(self.config.learning_rate_a);
            translation = translation - grad_t.mul_scalar(self.config.learning_rate_t);
        }

        population.write(ids, matrix, translation)?;
        outcome.ok_or_else(|| AtlasError::invalid_configuration("affine_steps must be positive"))
    }

    /// Average the accumulated atlas gradient across ranks and step the atlas.
    ///
    /// The pending loss rides along in the same collective; the reduced
    /// value is returned.
    fn atlas_step(
        &mut self,
        atlas: AtlasImage<B>,
        grad: Tensor<Inner<B>, 3>,
        pending_loss: f64,
        accumulated: usize,
    ) -> Result<(AtlasImage<B>, f64)> {
        let world = self.group.world_size();
        let (grad, loss) = if world > 1 {
            let dims = grad.dims();
            let device = grad.device();
            let mut buf = grad
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|err| AtlasError::distributed(format!("cannot read atlas gradient: {err:?}")))?;
            buf.push(pending_loss as f32);
            self.group.all_reduce_sum(&mut buf)?;
            let loss = buf.pop().map(f64::from).unwrap_or_default();
            (Tensor::from_data(TensorData::new(buf, dims), &device), loss)
        } else {
            (grad, pending_loss)
        };

        let grad = grad.div_scalar((accumulated * world) as f64);
        debug!(
            "Atlas step over {} minibatches and {} ranks, lr {:e}",
            accumulated,
            world,
            self.optimizer.learning_rate()
        );
        let grads = atlas.gradients(grad);
        Ok((self.optimizer.step(atlas, grads), loss))
    }

    /// Dataset mean, combined across ranks so every replica starts equal.
    fn initial_atlas<Ds>(
        &self,
        dataset: &Ds,
        plan: &ShardPlan,
        device: &B::Device,
    ) -> Result<Field<Inner<B>, D>>
    where
        Ds: ImageDataset<Inner<B>, D>,
    {
        let shard = accumulate_shard(dataset, plan)?;
        if self.group.world_size() == 1 {
            return mean_to_field(shard.finalize()?, dataset.shape(), device);
        }

        let dims = shard.shape().map(<[usize]>::to_vec).ok_or(AtlasError::EmptyStream)?;
        let mut total = [shard.count() as f32];
        self.group.all_reduce_sum(&mut total)?;
        let total = f64::from(total[0]);
        if total <= 0.0 {
            return Err(AtlasError::EmptyStream);
        }

        // Each rank sends its count-weighted share of the global mean
        let share = shard.count() as f64 / total;
        let mut mean: Vec<f32> = shard.mean().iter().map(|m| (m * share) as f32).collect();
        self.group.all_reduce_sum(&mut mean)?;
        mean_to_field(TensorData::new(mean, dims), dataset.shape(), device)
    }
}
