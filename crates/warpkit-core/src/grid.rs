//! Resampling onto a new regular grid.
//!
//! An output grid is described relative to the input grid in index units:
//! `origin` is the input-index coordinate of the output grid's centre and
//! `spacing` is the output voxel step measured in input voxels. Output voxel
//! `j` therefore samples input position
//! `origin_k + (j_k − (out_k − 1)/2) · spacing_k`.
//!
//! [`GridSpec`] accepts any partial combination of shape, origin and spacing
//! and completes it against an input shape.

use std::marker::PhantomData;

use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

use crate::error::{ensure_supported_dimension, Result, WarpError};
use crate::field::Field;
use crate::flow::coordinate_grid;
use crate::interpolation::Sampler;
use crate::spatial::{Origin, Spacing, Vector};

/// One value for every axis, or one value per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PerAxis<T, const D: usize> {
    /// Replicated across all axes.
    Uniform(T),
    /// Given per axis.
    Each([T; D]),
}

impl<T: Copy, const D: usize> PerAxis<T, D> {
    /// Expand to one value per axis.
    pub fn expand(&self) -> [T; D] {
        match self {
            Self::Uniform(value) => [*value; D],
            Self::Each(values) => *values,
        }
    }

    /// Build from a slice of length 1 (uniform) or `D`.
    pub fn from_slice(values: &[T]) -> Result<Self> {
        match values.len() {
            1 => Ok(Self::Uniform(values[0])),
            n if n == D => {
                let mut each = [values[0]; D];
                each.copy_from_slice(values);
                Ok(Self::Each(each))
            }
            n => Err(WarpError::invalid_configuration(format!(
                "expected 1 or {} values, got {}",
                D, n
            ))),
        }
    }
}

impl<const D: usize> From<usize> for PerAxis<usize, D> {
    fn from(value: usize) -> Self {
        Self::Uniform(value)
    }
}

impl<const D: usize> From<[usize; D]> for PerAxis<usize, D> {
    fn from(values: [usize; D]) -> Self {
        Self::Each(values)
    }
}

impl<const D: usize> From<f64> for PerAxis<f64, D> {
    fn from(value: f64) -> Self {
        Self::Uniform(value)
    }
}

impl<const D: usize> From<[f64; D]> for PerAxis<f64, D> {
    fn from(values: [f64; D]) -> Self {
        Self::Each(values)
    }
}

/// Partial output-grid specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSpec<const D: usize> {
    shape: Option<PerAxis<usize, D>>,
    origin: Option<PerAxis<f64, D>>,
    spacing: Option<PerAxis<f64, D>>,
}

impl<const D: usize> GridSpec<D> {
    /// Empty specification. At least one field must be set before resolving.
    pub fn new() -> Self {
        Self {
            shape: None,
            origin: None,
            spacing: None,
        }
    }

    /// Set the output shape.
    pub fn with_shape(mut self, shape: impl Into<PerAxis<usize, D>>) -> Self {
        self.shape = Some(shape.into());
        self
    }

    /// Set the output centre in input index coordinates.
    pub fn with_origin(mut self, origin: impl Into<PerAxis<f64, D>>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Set the output step in input voxels.
    pub fn with_spacing(mut self, spacing: impl Into<PerAxis<f64, D>>) -> Self {
        self.spacing = Some(spacing.into());
        self
    }

    /// Complete the specification against an input grid shape.
    ///
    /// | given                    | resolution                                     |
    /// |--------------------------|------------------------------------------------|
    /// | nothing                  | error                                          |
    /// | spacing                  | centred, shape just covering the input         |
    /// | origin                   | input shape, unit spacing                      |
    /// | origin + spacing         | error: shape required                          |
    /// | shape                    | centred, corner voxels aligned                 |
    /// | shape + spacing          | centred                                        |
    /// | shape + origin           | unit spacing                                   |
    /// | shape + origin + spacing | verbatim                                       |
    pub fn resolve(&self, input_shape: [usize; D]) -> Result<GridGeometry<D>> {
        ensure_supported_dimension(D)?;
        if input_shape.iter().any(|&n| n == 0) {
            return Err(WarpError::invalid_configuration("input grid has an empty axis"));
        }

        let shape = self.shape.map(|s| s.expand());
        let origin = self.origin.map(|o| o.expand());
        let spacing = self.spacing.map(|s| s.expand());
        if let Some(spacing) = spacing {
            if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(WarpError::invalid_configuration(format!(
                    "spacing must be positive and finite, got {:?}",
                    spacing
                )));
            }
        }

        let center = Vector::center_of(input_shape).to_array();
        let (shape, origin, spacing) = match (shape, origin, spacing) {
            (None, None, None) => {
                return Err(WarpError::invalid_configuration(
                    "at least one of shape, origin or spacing is required",
                ))
            }
            (None, None, Some(spacing)) => {
                let shape = std::array::from_fn(|k| {
                    let span = (input_shape[k] - 1) as f64 / spacing[k];
                    (span - 1e-9).ceil().max(0.0) as usize + 1
                });
                (shape, center, spacing)
            }
            (None, Some(origin), None) => (input_shape, origin, [1.0; D]),
            (None, Some(_), Some(_)) => {
                return Err(WarpError::invalid_configuration(
                    "shape is required when both origin and spacing are given",
                ))
            }
            (Some(shape), None, None) => {
                let spacing = std::array::from_fn(|k| {
                    if shape[k] > 1 {
                        (input_shape[k] - 1) as f64 / (shape[k] - 1) as f64
                    } else {
                        1.0
                    }
                });
                (shape, center, spacing)
            }
            (Some(shape), None, Some(spacing)) => (shape, center, spacing),
            (Some(shape), Some(origin), None) => (shape, origin, [1.0; D]),
            (Some(shape), Some(origin), Some(spacing)) => (shape, origin, spacing),
        };

        let geometry = GridGeometry::new(shape, Origin::new(origin), Spacing::new(spacing))?;
        tracing::debug!(
            "Resolved output grid {:?} -> shape {:?}, origin {:?}, spacing {:?}",
            input_shape,
            geometry.shape,
            origin,
            spacing
        );
        Ok(geometry)
    }
}

/// Fully resolved output grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry<const D: usize> {
    shape: [usize; D],
    origin: Origin<D>,
    spacing: Spacing<D>,
}

impl<const D: usize> GridGeometry<D> {
    /// Create a geometry, rejecting empty shapes and non-finite values.
    pub fn new(shape: [usize; D], origin: Origin<D>, spacing: Spacing<D>) -> Result<Self> {
        ensure_supported_dimension(D)?;
        if shape.iter().any(|&n| n == 0) {
            return Err(WarpError::invalid_configuration(format!(
                "output shape {:?} has an empty axis",
                shape
            )));
        }
        let finite = |v: &Vector<D>| v.to_array().iter().all(|x| x.is_finite());
        if !finite(&origin) || !finite(&spacing) {
            return Err(WarpError::invalid_configuration(
                "origin and spacing must be finite",
            ));
        }
        Ok(Self {
            shape,
            origin,
            spacing,
        })
    }

    /// Output grid shape.
    pub fn shape(&self) -> [usize; D] {
        self.shape
    }

    /// Output centre in input index coordinates.
    pub fn origin(&self) -> Origin<D> {
        self.origin
    }

    /// Output step in input voxels.
    pub fn spacing(&self) -> Spacing<D> {
        self.spacing
    }

    /// Output voxels per input voxel along each axis (`1 / spacing`).
    ///
    /// This is the factor applied to displacement fields so that they stay
    /// expressed in output voxel units.
    pub fn resolution_ratio(&self) -> Vector<D> {
        self.spacing.recip()
    }

    /// Input index coordinates sampled by every output voxel, `[batch, D, P]`.
    pub fn positions<B: Backend>(&self, batch: usize, device: &B::Device) -> Result<Field<B, D>> {
        let origin = self.origin;
        let spacing = self.spacing;
        let shape = self.shape;
        let data = coordinate_grid::<B, D>(
            batch,
            shape,
            |k, j| origin[k] + (j as f64 - (shape[k] as f64 - 1.0) * 0.5) * spacing[k],
            device,
        );
        Field::new(data, shape)
    }
}

/// Multiply channel `k` of a `[N, D, P]` tensor by `factors[k]`.
fn scale_channels<B: Backend, const D: usize>(data: Tensor<B, 3>, factors: [f64; D]) -> Tensor<B, 3> {
    let [n, _, p] = data.dims();
    let factors = factors.map(|f| f as f32);
    let factors = Tensor::<B, 1>::from_floats(factors.as_slice(), &data.device())
        .reshape([1, D, 1])
        .repeat(&[n, 1, p]);
    data * factors
}

/// Resample every channel of `source` onto `geometry`.
///
/// With `displacement`, `source` must have `D` channels and channel `k` is
/// multiplied by `1 / spacing_k` after sampling.
pub fn regrid<B: Backend, S: Sampler<B>, const D: usize>(
    sampler: &S,
    source: &Field<B, D>,
    geometry: &GridGeometry<D>,
    displacement: bool,
) -> Result<Field<B, D>> {
    if displacement {
        source.ensure_vector_field()?;
    }
    let positions = geometry.positions::<B>(1, &source.device())?;
    let output = sampler.sample(source, &positions)?;
    if displacement {
        let ratio = geometry.resolution_ratio().to_array();
        Ok(output.map(|t| scale_channels(t, ratio)))
    } else {
        Ok(output)
    }
}

/// Values captured by [`Regrid::forward`] for the backward pass.
#[derive(Debug, Clone)]
pub struct RegridContext<const D: usize> {
    input_shape: [usize; D],
    batch: usize,
    channels: usize,
    geometry: GridGeometry<D>,
    displacement: bool,
}

impl<const D: usize> RegridContext<D> {
    /// Geometry the forward pass resampled onto.
    pub fn geometry(&self) -> &GridGeometry<D> {
        &self.geometry
    }
}

/// Explicit forward/backward pair for [`regrid`].
///
/// Resampling is linear in the source, so the backward pass only needs the
/// input shape and the geometry, not the source values.
#[derive(Debug, Clone)]
pub struct Regrid<B: AutodiffBackend, S> {
    sampler: S,
    _backend: PhantomData<B>,
}

impl<B, S> Regrid<B, S>
where
    B: AutodiffBackend,
    S: Sampler<B> + Sampler<B::InnerBackend>,
{
    /// Create a new operation around a sampler.
    pub fn new(sampler: S) -> Self {
        Self {
            sampler,
            _backend: PhantomData,
        }
    }

    /// Resample and capture the context for [`Regrid::backward`].
    pub fn forward<const D: usize>(
        &self,
        source: &Field<B::InnerBackend, D>,
        geometry: &GridGeometry<D>,
        displacement: bool,
    ) -> Result<(Field<B::InnerBackend, D>, RegridContext<D>)> {
        let output = regrid(&self.sampler, source, geometry, displacement)?;
        let ctx = RegridContext {
            input_shape: source.shape(),
            batch: source.batch(),
            channels: source.channels(),
            geometry: geometry.clone(),
            displacement,
        };
        Ok((output, ctx))
    }

    /// Gradient with respect to the source given the output gradient.
    pub fn backward<const D: usize>(
        &self,
        ctx: &RegridContext<D>,
        grad_output: &Field<B::InnerBackend, D>,
    ) -> Result<Field<B::InnerBackend, D>> {
        let expected = [ctx.batch, ctx.channels, ctx.geometry.shape.iter().product()];
        if grad_output.data().dims() != expected || grad_output.shape() != ctx.geometry.shape {
            return Err(WarpError::shape_mismatch(&expected, &grad_output.data().dims()));
        }

        let device = grad_output.device();
        let zero_input = Field::<B, D>::zeros(ctx.batch, ctx.channels, ctx.input_shape, &device).require_grad();
        let resampled = regrid(&self.sampler, &zero_input, &ctx.geometry, false)?;
        let grads = (resampled.into_tensor() * Tensor::from_inner(grad_output.data().clone()))
            .sum()
            .backward();
        let grad = zero_input
            .grad(&grads)
            .ok_or_else(|| WarpError::sampling("regrid backward produced no gradient"))?;

        if ctx.displacement {
            let ratio = ctx.geometry.resolution_ratio().to_array();
            Ok(grad.map(|t| scale_channels(t, ratio)))
        } else {
            Ok(grad)
        }
    }
}
