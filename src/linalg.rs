//! Thin ndarray/faer bridge for the dense solves the engine needs.
//!
//! The only consumer today is the interpolation regression, which solves a
//! small normal-equations system per period. faer's Cholesky factorizations
//! do the work; conversions go through `Mat::from_fn` since the systems are
//! tiny relative to the Monte Carlo integration around them.

use faer::linalg::solvers::{Ldlt as FaerLdlt, Llt as FaerLlt, Solve as FaerSolve};
use faer::{Mat, Side};
use ndarray::{Array1, Array2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("symmetric factorization failed (matrix is not positive definite or is singular)")]
    FactorizationFailed,
    #[error("solve produced non-finite values (rank-deficient system)")]
    NonFiniteSolution,
}

fn array2_to_mat(a: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn array1_to_col(v: &Array1<f64>) -> Mat<f64> {
    Mat::from_fn(v.len(), 1, |i, _| v[i])
}

enum SymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl SymmetricFactor {
    fn solve(&self, rhs: &Mat<f64>) -> Mat<f64> {
        match self {
            SymmetricFactor::Llt(f) => f.solve(rhs),
            SymmetricFactor::Ldlt(f) => f.solve(rhs),
        }
    }
}

/// Factorize a symmetric system with an LLT first attempt and LDLT fallback.
fn factorize_symmetric(matrix: &Mat<f64>) -> Result<SymmetricFactor, LinalgError> {
    if let Ok(llt) = FaerLlt::new(matrix.as_ref(), Side::Lower) {
        return Ok(SymmetricFactor::Llt(llt));
    }
    let ldlt = FaerLdlt::new(matrix.as_ref(), Side::Lower)
        .map_err(|_| LinalgError::FactorizationFailed)?;
    Ok(SymmetricFactor::Ldlt(ldlt))
}

/// Ordinary least squares via the normal equations, `(XᵀX) β = Xᵀy`.
///
/// The design matrices here have a handful of columns, so forming XᵀX is
/// cheaper and accurate enough; rank deficiency surfaces either as a failed
/// factorization or a non-finite solution, both reported as errors so the
/// caller can take its degenerate-fit fallback.
pub fn solve_least_squares(x: &Array2<f64>, y: &Array1<f64>) -> Result<Array1<f64>, LinalgError> {
    debug_assert_eq!(x.nrows(), y.len(), "design rows must match response length");
    let xtx = array2_to_mat(&x.t().dot(x));
    let xty = array1_to_col(&x.t().dot(y));
    let factor = factorize_symmetric(&xtx)?;
    let beta = factor.solve(&xty);
    let out = Array1::from_shape_fn(x.ncols(), |i| beta[(i, 0)]);
    if out.iter().any(|b| !b.is_finite()) {
        return Err(LinalgError::NonFiniteSolution);
    }
    Ok(out)
}
