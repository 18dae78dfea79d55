use crate::optimizer::Optimizer;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer as BurnOptimizer};
use burn::tensor::backend::AutodiffBackend;

/// Adam on the atlas image.
///
/// Step sizes are roughly `lr` per voxel regardless of the gradient scale,
/// so the learning rate is in image intensity units rather than the large
/// values plain descent needs.
pub struct AdamOptimizer<M: AutodiffModule<B>, B: AutodiffBackend> {
    optimizer: OptimizerAdaptor<Adam, M, B>,
    learning_rate: f64,
}

impl<M: AutodiffModule<B>, B: AutodiffBackend> AdamOptimizer<M, B> {
    /// Adam with burn's default moment decay rates.
    pub fn new(learning_rate: f64) -> Self {
        Self::from_config(learning_rate, AdamConfig::new())
    }

    /// Adam with explicit decay rates `beta_1`, `beta_2` and denominator offset `epsilon`.
    pub fn with_betas(learning_rate: f64, beta_1: f32, beta_2: f32, epsilon: f32) -> Self {
        let config = AdamConfig::new()
            .with_beta_1(beta_1)
            .with_beta_2(beta_2)
            .with_epsilon(epsilon);
        Self::from_config(learning_rate, config)
    }

    fn from_config(learning_rate: f64, config: AdamConfig) -> Self {
        Self {
            optimizer: config.init(),
            learning_rate,
        }
    }
}

impl<M, B> Optimizer<M, B> for AdamOptimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    fn step(&mut self, module: M, gradients: GradientsParams) -> M {
        self.optimizer.step(self.learning_rate, module, gradients)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}
