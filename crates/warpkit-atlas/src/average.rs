//! Streaming mean over batches.
//!
//! The running mean is kept in `f64` and updated as
//! `mean ← mean·S/(S+n) + sum/(S+n)`, `S ← S+n`, so the result does not
//! depend on how the data is split into batches. This is plain incremental
//! averaging, not compensated summation.

use burn::tensor::backend::Backend;
use burn::tensor::{DType, Tensor, TensorData};
use warpkit_core::Field;

use crate::dataset::{ImageDataset, ShardPlan};
use crate::error::{AtlasError, Result};

/// Running mean along one axis of a stream of arrays.
#[derive(Debug, Clone)]
pub struct StreamingMean {
    axis: usize,
    mean: Vec<f64>,
    count: usize,
    shape: Option<Vec<usize>>,
    dtype: Option<DType>,
}

impl StreamingMean {
    /// Average along `axis` of every array passed to [`StreamingMean::update`].
    pub fn new(axis: usize) -> Self {
        Self {
            axis,
            mean: Vec::new(),
            count: 0,
            shape: None,
            dtype: None,
        }
    }

    /// Number of items averaged so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Current mean, empty before the first update.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Shape of the averaged item, known after the first update.
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    /// Fold in a batch; the extent of the reduction axis is its item count.
    pub fn update(&mut self, batch: &TensorData) -> Result<()> {
        let dims = batch.shape.clone();
        if self.axis >= dims.len() {
            return Err(AtlasError::invalid_configuration(format!(
                "reduction axis {} out of range for rank {}",
                self.axis,
                dims.len()
            )));
        }

        let n = dims[self.axis];
        let outer: usize = dims[..self.axis].iter().product();
        let inner: usize = dims[self.axis + 1..].iter().product();
        let values = batch
            .clone()
            .convert::<f64>()
            .to_vec::<f64>()
            .map_err(|err| AtlasError::dataset(format!("cannot read batch: {err:?}")))?;

        let mut sum = vec![0.0f64; outer * inner];
        for o in 0..outer {
            for j in 0..n {
                let row = &values[(o * n + j) * inner..(o * n + j + 1) * inner];
                for (acc, v) in sum[o * inner..(o + 1) * inner].iter_mut().zip(row) {
                    *acc += v;
                }
            }
        }

        let mut reduced = dims;
        reduced.remove(self.axis);
        self.fold(n, &sum, reduced)?;
        self.dtype.get_or_insert(batch.dtype);
        Ok(())
    }

    /// Fold in `n` items given only their element-wise sum.
    pub fn update_sum(&mut self, n: usize, sum: &[f64]) -> Result<()> {
        let shape = self
            .shape
            .clone()
            .unwrap_or_else(|| vec![sum.len()]);
        self.fold(n, sum, shape)
    }

    fn fold(&mut self, n: usize, sum: &[f64], shape: Vec<usize>) -> Result<()> {
        if let Some(expected) = &self.shape {
            if *expected != shape || self.mean.len() != sum.len() {
                return Err(AtlasError::shape_mismatch(expected, &[sum.len()]));
            }
        } else {
            if shape.iter().product::<usize>() != sum.len() {
                return Err(AtlasError::shape_mismatch(&shape, &[sum.len()]));
            }
            self.shape = Some(shape);
            self.mean = vec![0.0; sum.len()];
        }
        if n == 0 {
            return Ok(());
        }

        let total = (self.count + n) as f64;
        let keep = self.count as f64 / total;
        for (m, s) in self.mean.iter_mut().zip(sum) {
            *m = *m * keep + s / total;
        }
        self.count += n;
        Ok(())
    }

    /// Consume the accumulator and return the mean.
    ///
    /// Float inputs come back in their own dtype; anything else as `f64`.
    pub fn finalize(self) -> Result<TensorData> {
        let shape = match self.shape {
            Some(shape) if self.count > 0 => shape,
            _ => return Err(AtlasError::EmptyStream),
        };
        let data = TensorData::new(self.mean, shape);
        Ok(match self.dtype {
            Some(DType::F32) => data.convert::<f32>(),
            Some(DType::F16) => data.convert::<burn::tensor::f16>(),
            Some(DType::BF16) => data.convert::<burn::tensor::bf16>(),
            _ => data,
        })
    }
}

/// Stream every minibatch of a shard into a running mean along the batch axis.
pub fn accumulate_shard<B: Backend, Ds: ImageDataset<B, D>, const D: usize>(
    dataset: &Ds,
    plan: &ShardPlan,
) -> Result<StreamingMean> {
    let mut mean = StreamingMean::new(0);
    for ids in plan.batches() {
        let images = dataset.batch(ids)?;
        mean.update(&images.into_tensor().into_data())?;
    }
    Ok(mean)
}

/// Mean image of a dataset shard as a 1-batch field.
pub fn batch_average<B: Backend, Ds: ImageDataset<B, D>, const D: usize>(
    dataset: &Ds,
    plan: &ShardPlan,
    device: &B::Device,
) -> Result<Field<B, D>> {
    let mean = accumulate_shard(dataset, plan)?.finalize()?;
    mean_to_field(mean, dataset.shape(), device)
}

/// Lift a finalized `[C, P]` mean into a `[1, C, P]` field.
pub(crate) fn mean_to_field<B: Backend, const D: usize>(
    mean: TensorData,
    shape: [usize; D],
    device: &B::Device,
) -> Result<Field<B, D>> {
    let dims = mean.shape.clone();
    let [channels, p] = match dims.as_slice() {
        [c, p] => [*c, *p],
        _ => return Err(AtlasError::shape_mismatch(&[1, shape.iter().product()], &dims)),
    };
    let data = Tensor::<B, 2>::from_data(mean.convert::<f32>(), device).reshape([1, channels, p]);
    Ok(Field::new(data, shape)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_sum_matches_closed_form() {
        let mut mean = StreamingMean::new(0);
        mean.update_sum(2, &[4.0, 6.0]).unwrap();
        mean.update_sum(3, &[9.0, 12.0]).unwrap();
        assert_eq!(mean.count(), 5);
        let m = mean.mean();
        assert!((m[0] - 2.6).abs() < 1e-12);
        assert!((m[1] - 3.6).abs() < 1e-12);
    }

    #[test]
    fn test_order_and_granularity_do_not_matter() {
        let rows: Vec<[f32; 3]> = (0..7).map(|i| [i as f32, (i * i) as f32, 1.0 - i as f32]).collect();

        let mut whole = StreamingMean::new(0);
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        whole.update(&TensorData::new(flat, [7, 3])).unwrap();

        let mut pieces = StreamingMean::new(0);
        for chunk in rows.chunks(3).rev() {
            let flat: Vec<f32> = chunk.iter().flatten().copied().collect();
            pieces.update(&TensorData::new(flat, [chunk.len(), 3])).unwrap();
        }

        for (a, b) in whole.mean().iter().zip(pieces.mean()) {
            assert!((a - b).abs() < 1e-12, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_inner_axis_reduction() {
        let mut mean = StreamingMean::new(1);
        // [2, 3, 2]: average over the middle axis
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        mean.update(&TensorData::new(values, [2, 3, 2])).unwrap();
        assert_eq!(mean.shape(), Some(&[2usize, 2][..]));
        assert_eq!(mean.mean(), &[2.0, 3.0, 8.0, 9.0]);
    }

    #[test]
    fn test_finalize_keeps_float_dtype() {
        let mut mean = StreamingMean::new(0);
        mean.update(&TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2])).unwrap();
        let data = mean.finalize().unwrap();
        assert_eq!(data.dtype, DType::F32);
        assert_eq!(data.shape, vec![2]);
        assert_eq!(data.as_slice::<f32>().unwrap(), &[2.0, 3.0]);

        let mut mean = StreamingMean::new(0);
        mean.update(&TensorData::new(vec![1i32, 2, 4, 8], [2, 2])).unwrap();
        let data = mean.finalize().unwrap();
        assert_eq!(data.dtype, DType::F64);
        assert_eq!(data.as_slice::<f64>().unwrap(), &[2.5, 5.0]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(StreamingMean::new(0).finalize(), Err(AtlasError::EmptyStream)));

        let mut mean = StreamingMean::new(3);
        assert!(mean.update(&TensorData::new(vec![0.0f32; 4], [2, 2])).is_err());

        let mut mean = StreamingMean::new(0);
        mean.update(&TensorData::new(vec![0.0f32; 4], [2, 2])).unwrap();
        assert!(matches!(
            mean.update(&TensorData::new(vec![0.0f32; 6], [2, 3])),
            Err(AtlasError::ShapeMismatch { .. })
        ));
        assert!(mean.update_sum(1, &[0.0, 0.0, 0.0]).is_err());
    }
}
