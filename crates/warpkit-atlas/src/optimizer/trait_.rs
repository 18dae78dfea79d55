//! Optimizer trait for the atlas update.
//!
//! The atlas fitter computes the atlas gradient itself (accumulated over
//! minibatches and averaged across ranks) and hands it to an optimizer as
//! burn [`GradientsParams`].

use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::tensor::backend::AutodiffBackend;

/// Optimizer trait for module parameters.
///
/// # Type Parameters
/// * `M` - The module to optimize
/// * `B` - The backend for tensor operations (must support autodiff)
pub trait Optimizer<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    /// Perform a single optimization step.
    ///
    /// # Arguments
    /// * `module` - The module to update
    /// * `gradients` - The gradients of the loss with respect to module parameters
    ///
    /// # Returns
    /// The updated module
    fn step(&mut self, module: M, gradients: GradientsParams) -> M;

    /// Get the current learning rate.
    fn learning_rate(&self) -> f64;

    /// Set the learning rate.
    fn set_learning_rate(&mut self, lr: f64);
}
