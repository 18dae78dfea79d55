//! Batched small-matrix algebra.
//!
//! Closed-form determinant and inverse for stacks of 2×2 and 3×3 matrices.
//! Everything is expressed as element-wise tensor arithmetic over the batch
//! axis, so results stay differentiable under an autodiff backend and no
//! sample ever interacts with another.
//!
//! Singular input is not detected: the division by a zero determinant
//! produces non-finite entries.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{ensure_supported_dimension, Result, WarpError};

/// Check that `matrices` is `[N, D, D]` with `D` in {2, 3}; return `N`.
pub(crate) fn check_square<B: Backend, const D: usize>(matrices: &Tensor<B, 3>) -> Result<usize> {
    ensure_supported_dimension(D)?;
    let [n, rows, cols] = matrices.dims();
    if rows != D || cols != D {
        return Err(WarpError::shape_mismatch(&[n, D, D], &[n, rows, cols]));
    }
    Ok(n)
}

/// Entry `(i, j)` of every matrix in the batch, shape `[N]`.
fn entry<B: Backend>(matrices: &Tensor<B, 3>, n: usize, i: usize, j: usize) -> Tensor<B, 1> {
    matrices
        .clone()
        .slice([0..n, i..i + 1, j..j + 1])
        .reshape([n])
}

/// Determinant of the 2×2 minor that remains after deleting row `i` and
/// column `j` of a 3×3 batch.
fn minor<B: Backend>(matrices: &Tensor<B, 3>, n: usize, i: usize, j: usize) -> Tensor<B, 1> {
    let rows: Vec<usize> = (0..3).filter(|&r| r != i).collect();
    let cols: Vec<usize> = (0..3).filter(|&c| c != j).collect();
    entry(matrices, n, rows[0], cols[0]) * entry(matrices, n, rows[1], cols[1])
        - entry(matrices, n, rows[0], cols[1]) * entry(matrices, n, rows[1], cols[0])
}

/// Signed cofactor `(-1)^(i+j) det(minor_ij)` of a 3×3 batch.
fn cofactor<B: Backend>(matrices: &Tensor<B, 3>, n: usize, i: usize, j: usize) -> Tensor<B, 1> {
    let m = minor(matrices, n, i, j);
    if (i + j) % 2 == 0 {
        m
    } else {
        m.neg()
    }
}

fn determinant_2x2<B: Backend>(matrices: &Tensor<B, 3>, n: usize) -> Tensor<B, 1> {
    entry(matrices, n, 0, 0) * entry(matrices, n, 1, 1)
        - entry(matrices, n, 0, 1) * entry(matrices, n, 1, 0)
}

fn determinant_3x3<B: Backend>(matrices: &Tensor<B, 3>, n: usize) -> Tensor<B, 1> {
    // First-row expansion.
    (0..3)
        .map(|j| entry(matrices, n, 0, j) * cofactor(matrices, n, 0, j))
        .reduce(|acc, term| acc + term)
        .unwrap_or_else(|| Tensor::zeros([n], &matrices.device()))
}

/// Determinant of each matrix in a `[N, D, D]` batch.
///
/// # Errors
/// * [`WarpError::UnsupportedDimension`] if `D` is not 2 or 3
/// * [`WarpError::ShapeMismatch`] if the trailing dims are not `[D, D]`
pub fn determinant<B: Backend, const D: usize>(matrices: &Tensor<B, 3>) -> Result<Tensor<B, 1>> {
    let n = check_square::<B, D>(matrices)?;
    match D {
        2 => Ok(determinant_2x2(matrices, n)),
        3 => Ok(determinant_3x3(matrices, n)),
        other => Err(WarpError::UnsupportedDimension(other)),
    }
}

/// Inverse of each matrix in a `[N, D, D]` batch.
///
/// 2×2 uses the adjugate over the determinant, 3×3 the transposed cofactor
/// matrix over the determinant.
///
/// # Errors
/// Same conditions as [`determinant`].
pub fn invert<B: Backend, const D: usize>(matrices: &Tensor<B, 3>) -> Result<Tensor<B, 3>> {
    let n = check_square::<B, D>(matrices)?;
    let entries: Vec<Tensor<B, 1>> = match D {
        2 => {
            let det = determinant_2x2(matrices, n);
            let adjugate = [
                entry(matrices, n, 1, 1),
                entry(matrices, n, 0, 1).neg(),
                entry(matrices, n, 1, 0).neg(),
                entry(matrices, n, 0, 0),
            ];
            adjugate.into_iter().map(|e| e / det.clone()).collect()
        }
        3 => {
            let det = determinant_3x3(matrices, n);
            let mut entries = Vec::with_capacity(9);
            for i in 0..3 {
                for j in 0..3 {
                    // inverse[i][j] = C[j][i] / det
                    entries.push(cofactor(matrices, n, j, i) / det.clone());
                }
            }
            entries
        }
        other => return Err(WarpError::UnsupportedDimension(other)),
    };
    Ok(Tensor::stack::<2>(entries, 1).reshape([n, D, D]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use nalgebra::Matrix3;

    type TestBackend = NdArray<f32>;

    fn batch(values: Vec<f32>, n: usize, d: usize) -> Tensor<TestBackend, 3> {
        Tensor::from_data(TensorData::new(values, [n, d, d]), &Default::default())
    }

    fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!((a - e).abs() < tol, "entry {}: expected {}, got {}", i, e, a);
        }
    }

    #[test]
    fn test_invert_diagonal_3x3() {
        let m = batch(vec![2.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 5.0], 1, 3);
        let inv = invert::<TestBackend, 3>(&m).unwrap();
        let data = inv.into_data();
        assert_close(
            data.as_slice::<f32>().unwrap(),
            &[0.5, 0.0, 0.0, 0.0, 0.25, 0.0, 0.0, 0.0, 0.2],
            1e-6,
        );
    }

    #[test]
    fn test_invert_2x2() {
        let m = batch(vec![4.0, 7.0, 2.0, 6.0], 1, 2);
        let inv = invert::<TestBackend, 2>(&m).unwrap();
        let data = inv.into_data();
        assert_close(data.as_slice::<f32>().unwrap(), &[0.6, -0.7, -0.2, 0.4], 1e-6);

        let det = determinant::<TestBackend, 2>(&m).unwrap().into_data();
        assert_close(det.as_slice::<f32>().unwrap(), &[10.0], 1e-6);
    }

    #[test]
    fn test_invert_3x3_matches_nalgebra() {
        let values = [2.0f32, -1.0, 0.5, 1.0, 3.0, -2.0, 0.0, 1.5, 4.0];
        let reference = Matrix3::from_row_slice(&values.map(f64::from))
            .try_inverse()
            .unwrap();

        let m = batch(values.to_vec(), 1, 3);
        let inv = invert::<TestBackend, 3>(&m).unwrap().into_data();
        let inv = inv.as_slice::<f32>().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = reference[(i, j)] as f32;
                assert!(
                    (inv[i * 3 + j] - expected).abs() < 1e-5,
                    "inverse[{}][{}]: expected {}, got {}",
                    i,
                    j,
                    expected,
                    inv[i * 3 + j]
                );
            }
        }

        let det = determinant::<TestBackend, 3>(&m).unwrap().into_data();
        let expected_det = Matrix3::from_row_slice(&values.map(f64::from)).determinant() as f32;
        assert_close(det.as_slice::<f32>().unwrap(), &[expected_det], 1e-4);
    }

    #[test]
    fn test_batch_entries_are_independent() {
        let m = batch(vec![2.0, 0.0, 0.0, 2.0, 1.0, 1.0, 0.0, 1.0], 2, 2);
        let inv = invert::<TestBackend, 2>(&m).unwrap().into_data();
        assert_close(
            inv.as_slice::<f32>().unwrap(),
            &[0.5, 0.0, 0.0, 0.5, 1.0, -1.0, 0.0, 1.0],
            1e-6,
        );
    }

    #[test]
    fn test_singular_matrix_is_not_an_error() {
        let m = batch(vec![1.0, 2.0, 2.0, 4.0], 1, 2);
        let inv = invert::<TestBackend, 2>(&m).unwrap().into_data();
        assert!(inv.as_slice::<f32>().unwrap().iter().any(|v| !v.is_finite()));
    }

    #[test]
    fn test_unsupported_dimension() {
        let m = Tensor::<TestBackend, 3>::zeros([1, 4, 4], &Default::default());
        assert_eq!(
            invert::<TestBackend, 4>(&m).unwrap_err(),
            WarpError::UnsupportedDimension(4)
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let m = Tensor::<TestBackend, 3>::zeros([2, 3, 3], &Default::default());
        assert!(matches!(
            determinant::<TestBackend, 2>(&m),
            Err(WarpError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_determinant_gradient_is_cofactor_matrix() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let m = Tensor::<B, 3>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 2]),
            &device,
        )
        .require_grad();

        let det = determinant::<B, 2>(&m).unwrap();
        let grads = det.sum().backward();
        let grad = m.grad(&grads).unwrap().into_data();
        assert_close(grad.as_slice::<f32>().unwrap(), &[4.0, -3.0, -2.0, 1.0], 1e-6);
    }
}
