//! Atlas fitting configuration.

use burn::config::Config;

use crate::error::AtlasError;

/// Hyperparameters of the joint affine atlas fit.
///
/// `image_update_freq = 0` updates the atlas once per epoch; `k > 0` updates
/// it after every `k` minibatches and once more at epoch end for any
/// remainder.
#[derive(Config, Debug, PartialEq)]
pub struct AtlasConfig {
    /// Passes over the dataset.
    #[config(default = "1000")]
    pub num_epochs: usize,
    /// Samples per minibatch on each rank.
    #[config(default = "50")]
    pub batch_size: usize,
    /// Minibatches between atlas updates, `0` for once per epoch.
    #[config(default = "0")]
    pub image_update_freq: usize,
    /// Gradient steps on the affine parameters per minibatch.
    #[config(default = "1")]
    pub affine_steps: usize,
    /// Weight of `½‖A‖²`.
    #[config(default = "0.0")]
    pub reg_weight_a: f64,
    /// Weight of `½‖T‖²`.
    #[config(default = "0.0")]
    pub reg_weight_t: f64,
    #[config(default = "1e-3")]
    pub learning_rate_a: f64,
    #[config(default = "1e-2")]
    pub learning_rate_t: f64,
    #[config(default = "1e5")]
    pub learning_rate_i: f64,
}

impl AtlasConfig {
    /// Reject settings the fit cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.num_epochs == 0 {
            return Err(AtlasError::invalid_configuration("num_epochs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(AtlasError::invalid_configuration("batch_size must be positive"));
        }
        if self.affine_steps == 0 {
            return Err(AtlasError::invalid_configuration("affine_steps must be positive"));
        }
        for (name, value) in [
            ("reg_weight_a", self.reg_weight_a),
            ("reg_weight_t", self.reg_weight_t),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AtlasError::invalid_configuration(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("learning_rate_a", self.learning_rate_a),
            ("learning_rate_t", self.learning_rate_t),
            ("learning_rate_i", self.learning_rate_i),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(AtlasError::invalid_configuration(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}
