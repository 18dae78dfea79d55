//! Synthetic populations for exercising the atlas fit.

use anyhow::Result;
use burn::tensor::backend::Backend;
use warpkit_atlas::InMemoryDataset;
use warpkit_core::Field;

/// Population of identical Gaussian blobs, each displaced from the grid centre.
#[derive(Debug, Clone)]
pub struct BlobPopulation {
    pub size: usize,
    pub width: f32,
    pub shifts: Vec<[f32; 2]>,
}

impl BlobPopulation {
    /// `samples` blobs on a `size × size` grid with shifts spread over a
    /// disc of radius `size / 8`.
    pub fn new(samples: usize, size: usize) -> Self {
        let radius = size as f32 / 8.0;
        let shifts = (0..samples)
            .map(|i| {
                let angle = i as f32 * 2.399_963; // golden angle
                let r = radius * ((i as f32 + 0.5) / samples.max(1) as f32).sqrt();
                [r * angle.cos(), r * angle.sin()]
            })
            .collect();
        Self {
            size,
            width: size as f32 / 6.0,
            shifts,
        }
    }

    fn blob(&self, shift: [f32; 2]) -> impl Iterator<Item = f32> + '_ {
        let c = (self.size as f32 - 1.0) / 2.0;
        let denom = 2.0 * self.width * self.width;
        (0..self.size * self.size).map(move |v| {
            let di = (v / self.size) as f32 - c - shift[0];
            let dj = (v % self.size) as f32 - c - shift[1];
            (-(di * di + dj * dj) / denom).exp()
        })
    }

    /// Render the population as an in-memory dataset.
    pub fn dataset<B: Backend>(&self, device: &B::Device) -> Result<InMemoryDataset<B, 2>> {
        let values: Vec<f32> = self.shifts.iter().flat_map(|&s| self.blob(s)).collect();
        let images = Field::from_floats(values, self.shifts.len(), 1, [self.size, self.size], device)?;
        Ok(InMemoryDataset::new(images)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use warpkit_atlas::ImageDataset;

    #[test]
    fn test_population_shape_and_peak() {
        let population = BlobPopulation::new(5, 12);
        assert_eq!(population.shifts.len(), 5);
        assert!(population.shifts.iter().all(|s| s[0].hypot(s[1]) <= 1.5 + 1e-6));

        let dataset = population.dataset::<NdArray<f32>>(&Default::default()).unwrap();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.shape(), [12, 12]);
        let values = dataset.batch(&[0]).unwrap().to_vec().unwrap();
        assert!(values.iter().all(|&v| v > 0.0 && v <= 1.0));
    }
}
