use crate::optimizer::Optimizer;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer as BurnOptimizer, Sgd, SgdConfig};
use burn::tensor::backend::AutodiffBackend;

/// Heavy-ball gradient descent: `v ← μ·v + ∇θ`, `θ ← θ − lr·v`.
///
/// Useful when the atlas is updated every few minibatches and single
/// gradients are noisy.
pub struct Momentum<M: AutodiffModule<B>, B: AutodiffBackend> {
    optimizer: OptimizerAdaptor<Sgd<B::InnerBackend>, M, B>,
    learning_rate: f64,
    momentum: f64,
}

impl<M: AutodiffModule<B>, B: AutodiffBackend> Momentum<M, B> {
    /// Heavy-ball descent with momentum factor `momentum` and no dampening.
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self::with_nesterov(learning_rate, momentum, false)
    }

    /// Same as [`Momentum::new`], optionally with the Nesterov correction.
    pub fn with_nesterov(learning_rate: f64, momentum: f64, nesterov: bool) -> Self {
        let momentum_config = MomentumConfig::new()
            .with_momentum(momentum)
            .with_dampening(0.0)
            .with_nesterov(nesterov);
        Self {
            optimizer: SgdConfig::new().with_momentum(Some(momentum_config)).init(),
            learning_rate,
            momentum,
        }
    }

    /// Momentum factor.
    pub fn momentum(&self) -> f64 {
        self.momentum
    }
}

impl<M, B> Optimizer<M, B> for Momentum<M, B>
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
