//! Small dense linear algebra for the minimizer.
//!
//! The minimizer works with tiny symmetric systems (one row per floated
//! parameter, rarely more than a dozen), so we lean on nalgebra's dense
//! decompositions directly:
//!
//! - Cholesky for the common, positive-definite case
//! - a symmetric eigen decomposition to force positive-definiteness when the
//!   Hessian at the minimum is not (Minuit's "forced pos. def." covariance)
//! - SVD with a tolerance ladder when a plain solve is needed on a matrix that
//!   may be singular

use nalgebra::{DMatrix, DVector};

/// Relative floor applied to eigenvalues when forcing positive-definiteness.
const EIGEN_FLOOR: f64 = 1e-3;

/// Inverse of a Hessian, flagged when it had to be made positive-definite.
#[derive(Debug, Clone)]
pub struct Inversion {
    pub inverse: DMatrix<f64>,
    pub forced_positive: bool,
}

/// Invert a symmetric matrix that should be positive-definite.
///
/// Returns `None` if the matrix has non-finite entries or is numerically zero.
pub fn invert_symmetric(m: &DMatrix<f64>) -> Option<Inversion> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    if let Some(chol) = m.clone().cholesky() {
        let inverse = chol.inverse();
        if inverse.iter().all(|v| v.is_finite()) {
            return Some(Inversion {
                inverse,
                forced_positive: false,
            });
        }
    }

    let eigen = m.clone().symmetric_eigen();
    let largest = eigen.eigenvalues.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if largest <= 0.0 {
        return None;
    }
    let floor = largest * EIGEN_FLOOR;
    let inv_values = eigen.eigenvalues.map(|v| 1.0 / v.max(floor));
    let q = &eigen.eigenvectors;
    let inverse = q * DMatrix::from_diagonal(&inv_values) * q.transpose();
    if inverse.iter().all(|v| v.is_finite()) {
        Some(Inversion {
            inverse,
            forced_positive: true,
        })
    } else {
        None
    }
}

/// Solve `(H + λ·diag(|H|)) δ = -g` for a damped Newton step.
///
/// Returns `None` when the damped system is still not positive-definite; the
/// caller is expected to increase `λ` and try again.
pub fn damped_newton_step(h: &DMatrix<f64>, g: &DVector<f64>, lambda: f64) -> Option<DVector<f64>> {
    let mut a = h.clone();
    for i in 0..a.nrows() {
        let d = h[(i, i)].abs().max(1e-12);
        a[(i, i)] += lambda * d;
    }
    let chol = a.cholesky()?;
    let step = chol.solve(&(-g));
    if step.iter().all(|v| v.is_finite()) {
        Some(step)
    } else {
        None
    }
}

/// Solve `a x = b` with SVD, loosening the tolerance until a finite answer appears.
pub fn solve_svd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = a.clone().svd(true, true);
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(x) = svd.solve(b, tol) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverts_positive_definite_matrix() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let inv = invert_symmetric(&m).unwrap();
        assert!(!inv.forced_positive);
        let id = &m * &inv.inverse;
        assert!((id[(0, 0)] - 1.0).abs() < 1e-12);
        assert!(id[(0, 1)].abs() < 1e-12);
    }

    #[test]
    fn forces_indefinite_matrix_positive() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        let inv = invert_symmetric(&m).unwrap();
        assert!(inv.forced_positive);
        assert!(inv.inverse[(0, 0)] > 0.0 && inv.inverse[(1, 1)] > 0.0);
    }

    #[test]
    fn damped_step_reduces_to_newton_without_damping() {
        let h = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 8.0]);
        let g = DVector::from_row_slice(&[2.0, -4.0]);
        let step = damped_newton_step(&h, &g, 0.0).unwrap();
        assert!((step[0] + 1.0).abs() < 1e-12);
        assert!((step[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn svd_solves_simple_system() {
        // y = 2 + 3x on x = [0, 1, 2]
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let b = DVector::from_row_slice(&[2.0, 5.0, 8.0]);
        let x = solve_svd(&a, &b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-10);
        assert!((x[1] - 3.0).abs() < 1e-10);
    }
}
