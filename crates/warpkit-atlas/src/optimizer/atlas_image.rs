//! The atlas image as an optimizable module.

use burn::module::{Module, Param};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use warpkit_core::Field;

/// Atlas image `[1, C, P]` wrapped as a single burn parameter.
#[derive(Module, Debug)]
pub struct AtlasImage<B: Backend> {
    image: Param<Tensor<B, 3>>,
}

impl<B: Backend> AtlasImage<B> {
    /// Wrap a `[1, C, P]` tensor.
    pub fn new(image: Tensor<B, 3>) -> Self {
        Self {
            image: Param::from_tensor(image),
        }
    }

    /// Wrap the tensor of a field.
    pub fn from_field<const D: usize>(field: Field<B, D>) -> Self {
        Self::new(field.into_tensor())
    }

    /// Current image values.
    pub fn image(&self) -> Tensor<B, 3> {
        self.image.val()
    }
}

impl<B: AutodiffBackend> AtlasImage<B> {
    /// Package an externally computed image gradient for an optimizer step.
    pub fn gradients(&self, grad: Tensor<B::InnerBackend, 3>) -> GradientsParams {
        let mut grads = GradientsParams::new();
        grads.register(self.image.id, grad);
        grads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{AdamOptimizer, GradientDescent, Momentum, Optimizer};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type Inner = NdArray<f32>;
    type TestBackend = Autodiff<Inner>;

    fn atlas(values: [f32; 4]) -> AtlasImage<TestBackend> {
        let device = Default::default();
        AtlasImage::new(Tensor::<TestBackend, 1>::from_floats(values, &device).reshape([1, 1, 4]))
    }

    fn grad(values: [f32; 4]) -> Tensor<Inner, 3> {
        Tensor::<Inner, 1>::from_floats(values, &Default::default()).reshape([1, 1, 4])
    }

    fn values(atlas: &AtlasImage<TestBackend>) -> Vec<f32> {
        atlas.image().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_gradient_descent_moves_against_gradient() {
        let image = atlas([1.0, 2.0, 3.0, 4.0]);
        let grads = image.gradients(grad([1.0, -1.0, 0.0, 2.0]));

        let mut optimizer = GradientDescent::new(0.5);
        let image = optimizer.step(image, grads);
        let updated = values(&image);
        for (u, e) in updated.iter().zip([0.5, 2.5, 3.0, 3.0]) {
            assert!((u - e).abs() < 1e-6, "{} vs {}", u, e);
        }
        assert_eq!(optimizer.learning_rate(), 0.5);
    }

    #[test]
    fn test_momentum_accelerates_constant_gradient() {
        let mut optimizer = Momentum::new(0.1, 0.9);
        let mut image = atlas([0.0; 4]);
        let mut previous = 0.0f32;
        let mut moves = Vec::new();
        for _ in 0..3 {
            let grads = image.gradients(grad([1.0; 4]));
            image = optimizer.step(image, grads);
            let current = values(&image)[0];
            moves.push(previous - current);
            previous = current;
        }
        assert!(moves[0] > 0.0);
        assert!(moves[1] > moves[0]);
        assert!(moves[2] > moves[1]);
    }

    #[test]
    fn test_adam_first_step_is_scale_free() {
        let mut optimizer = AdamOptimizer::new(0.1);
        let image = atlas([0.0; 4]);
        let grads = image.gradients(grad([100.0, 0.01, -5.0, 1.0]));
        let updated = values(&optimizer.step(image, grads));
        for (u, e) in updated.iter().zip([-0.1, -0.1, 0.1, -0.1]) {
            assert!((u - e).abs() < 2e-3, "{} vs {}", u, e);
        }
    }

    #[test]
    fn test_set_learning_rate() {
        let mut optimizer = GradientDescent::<AtlasImage<TestBackend>, TestBackend>::new(1.0);
        optimizer.set_learning_rate(3.0);
        let image = atlas([0.0; 4]);
        let grads = image.gradients(grad([1.0; 4]));
        assert!(values(&optimizer.step(image, grads))
            .iter()
            .all(|v| (v + 3.0).abs() < 1e-6));
    }
}
