//! Per-sample affine parameters of a population.
//!
//! Parameters live on the host as flat `f32` buffers so that a whole
//! population can be persisted or inspected without touching a device.
//! Minibatches read the entries they need as tensors and write them back
//! after updating.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::error::{AtlasError, Result};

/// Affine parameters `(A, T)` for every sample of a dataset.
///
/// `A` is stored as an offset from the identity: the map applied to sample
/// `i` is `x ↦ (A_i + I)·x + T_i`, so a zeroed population is the identity.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinePopulation<const D: usize> {
    matrices: Vec<f32>,     // N × D × D
    translations: Vec<f32>, // N × D
}

impl<const D: usize> AffinePopulation<D> {
    /// Identity parameters for `n` samples.
    pub fn zeros(n: usize) -> Self {
        Self {
            matrices: vec![0.0; n * D * D],
            translations: vec![0.0; n * D],
        }
    }

    /// Build from flat buffers (`N×D×D` matrices, `N×D` translations).
    pub fn from_parts(matrices: Vec<f32>, translations: Vec<f32>) -> Result<Self> {
        let n = translations.len() / D;
        if translations.len() != n * D || matrices.len() != n * D * D {
            return Err(AtlasError::shape_mismatch(
                &[n * D * D, n * D],
                &[matrices.len(), translations.len()],
            ));
        }
        Ok(Self {
            matrices,
            translations,
        })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.translations.len() / D
    }

    /// Whether the population is empty.
    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }

    /// Flat `N×D×D` matrix offsets.
    pub fn matrices(&self) -> &[f32] {
        &self.matrices
    }

    /// Flat `N×D` translations.
    pub fn translations(&self) -> &[f32] {
        &self.translations
    }

    fn check_ids(&self, ids: &[usize]) -> Result<()> {
        match ids.iter().find(|&&i| i >= self.len()) {
            Some(id) => Err(AtlasError::dataset(format!(
                "sample {} out of range for population of {}",
                id,
                self.len()
            ))),
            None => Ok(()),
        }
    }

    /// Gather `(A [k, D, D], T [k, D])` for the given sample ids.
    pub fn read<B: Backend>(
        &self,
        ids: &[usize],
        device: &B::Device,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 2>)> {
        self.check_ids(ids)?;
        let k = ids.len();
        let mut matrices = Vec::with_capacity(k * D * D);
        let mut translations = Vec::with_capacity(k * D);
        for &i in ids {
            matrices.extend_from_slice(&self.matrices[i * D * D..(i + 1) * D * D]);
            translations.extend_from_slice(&self.translations[i * D..(i + 1) * D]);
        }
        Ok((
            Tensor::from_data(TensorData::new(matrices, [k, D, D]), device),
            Tensor::from_data(TensorData::new(translations, [k, D]), device),
        ))
    }

    /// Scatter updated `(A, T)` back to the given sample ids.
    pub fn write<B: Backend>(
        &mut self,
        ids: &[usize],
        matrices: Tensor<B, 3>,
        translations: Tensor<B, 2>,
    ) -> Result<()> {
        self.check_ids(ids)?;
        let k = ids.len();
        if matrices.dims() != [k, D, D] {
            return Err(AtlasError::shape_mismatch(&[k, D, D], &matrices.dims()));
        }
        if translations.dims() != [k, D] {
            return Err(AtlasError::shape_mismatch(&[k, D], &translations.dims()));
        }

        let read = |data: TensorData| {
            data.convert::<f32>()
                .to_vec::<f32>()
                .map_err(|err| AtlasError::dataset(format!("cannot read parameters: {err:?}")))
        };
        let matrices = read(matrices.into_data())?;
        let translations = read(translations.into_data())?;
        for (j, &i) in ids.iter().enumerate() {
            self.matrices[i * D * D..(i + 1) * D * D]
                .copy_from_slice(&matrices[j * D * D..(j + 1) * D * D]);
            self.translations[i * D..(i + 1) * D]
                .copy_from_slice(&translations[j * D..(j + 1) * D]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_read_write_by_ids() {
        let device = Default::default();
        let mut population = AffinePopulation::<2>::zeros(4);
        assert_eq!(population.len(), 4);

        let matrices = Tensor::<TestBackend, 3>::from_floats(
            [[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]],
            &device,
        );
        let translations = Tensor::<TestBackend, 2>::from_floats([[0.5, -0.5], [1.5, -1.5]], &device);
        population.write(&[3, 1], matrices, translations).unwrap();

        assert_eq!(&population.matrices()[4..8], &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(&population.matrices()[12..16], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&population.translations()[..2], &[0.0, 0.0]);

        let (a, t) = population.read::<TestBackend>(&[1, 3], &device).unwrap();
        assert_eq!(a.dims(), [2, 2, 2]);
        assert_eq!(
            t.into_data().as_slice::<f32>().unwrap(),
            &[1.5, -1.5, 0.5, -0.5]
        );
    }

    #[test]
    fn test_out_of_range_ids() {
        let device = Default::default();
        let population = AffinePopulation::<3>::zeros(2);
        assert!(population.read::<TestBackend>(&[2], &device).is_err());
    }

    #[test]
    fn test_from_parts_checks_lengths() {
        assert!(AffinePopulation::<2>::from_parts(vec![0.0; 8], vec![0.0; 4]).is_ok());
        assert!(AffinePopulation::<2>::from_parts(vec![0.0; 7], vec![0.0; 4]).is_err());
    }
}
