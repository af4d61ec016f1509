use faer::{
    linalg::solvers::{PartialPivLu, Solve},
    Mat, MatRef,
};
use rayon::iter::*;
use thiserror::Error;

use crate::assert_square_mat;

/// Row norms at or below this floor are damped to a zero step instead of
/// being rescaled.
pub const NORM_FLOOR: f64 = 1e-10;

//////////////////////////////
// ENUMS, TYPES, STRUCTURES //
//////////////////////////////

/// Failures of the dense linear algebra primitives
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("matrix inversion produced non-finite entries")]
    SingularMatrix,

    #[error("matrix inversion residual {residual:.3e} exceeds tolerance {tolerance:.3e}")]
    IllConditioned { residual: f64, tolerance: f64 },
}

////////////////////////
// Gradient rescaling //
////////////////////////

/// Rescale a gradient to unit-row-norm step directions
///
/// Every row is divided by its L2 norm so the caller can scale the whole
/// matrix by a single step radius. Rows whose norm is at or below
/// [`NORM_FLOOR`] are zeroed, a near-zero row can therefore never blow up
/// into a huge step.
///
/// ### Params
///
/// * `mat` - The gradient matrix to rescale
///
/// ### Returns
///
/// A matrix of the same shape whose rows have L2 norm 1 or 0.
pub fn correct_by_norm(mat: MatRef<f64>) -> Mat<f64> {
    let mut corrected = mat.to_owned();

    for k in 0..mat.nrows() {
        let row_norm = mat
            .row(k)
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt();

        if row_norm > NORM_FLOOR {
            for j in 0..mat.ncols() {
                corrected[(k, j)] /= row_norm;
            }
        } else {
            for j in 0..mat.ncols() {
                corrected[(k, j)] = 0.0;
            }
        }
    }

    corrected
}

/// Per-row minimum-radius multipliers
///
/// Builds a multiplier matrix of ones, except that rows whose truncated row
/// (every column but the first) has an L2 norm below `r_const` carry
/// `r_const / row_norm` in the non-first columns. Applying the multipliers
/// elementwise pushes short rows out to the requested radius while leaving
/// the first coordinate untouched. Zero-norm rows keep their multipliers at
/// one, there is nothing to rescale.
///
/// ### Params
///
/// * `mat` - The matrix whose row radii are inspected
/// * `r_const` - The minimum radius to enforce
///
/// ### Returns
///
/// The multiplier matrix of the same shape as `mat`.
pub fn jump_norm(mat: MatRef<f64>, r_const: f64) -> Mat<f64> {
    let mut norm_ = Mat::from_fn(mat.nrows(), mat.ncols(), |_, _| 1.0);

    for k in 0..mat.nrows() {
        let row_norm = (1..mat.ncols())
            .map(|j| mat[(k, j)] * mat[(k, j)])
            .sum::<f64>()
            .sqrt();

        if row_norm > 0.0 && r_const > row_norm {
            for j in 1..mat.ncols() {
                norm_[(k, j)] = r_const / row_norm;
            }
        }
    }

    norm_
}

/////////////////
// Diagnostics //
/////////////////

/// Count the strictly negative entries of a matrix
pub fn count_negative(mat: MatRef<f64>) -> usize {
    (0..mat.ncols())
        .into_par_iter()
        .map(|j| mat.col(j).iter().filter(|&&x| x < 0.0).count())
        .sum()
}

///////////////
// Inversion //
///////////////

/// Checked matrix inversion
///
/// Inverts a square matrix through a partial-pivoting LU solve against the
/// identity and verifies the result before handing it back: non-finite
/// entries and reconstruction residuals `||A * A^-1 - I||` above the
/// conditioning tolerance are surfaced as errors instead of silently
/// propagating NaN or garbage downstream.
///
/// ### Params
///
/// * `mat` - The square matrix to invert
///
/// ### Returns
///
/// The inverse, or the [`LinalgError`] describing why the matrix cannot be
/// trusted to have one.
pub fn checked_inverse(mat: MatRef<f64>) -> Result<Mat<f64>, LinalgError> {
    assert_square_mat!(mat);

    let n = mat.nrows();
    let identity = Mat::<f64>::identity(n, n);

    let lu = PartialPivLu::new(mat);
    let inverse = lu.solve(&identity);

    for j in 0..n {
        for i in 0..n {
            if !inverse[(i, j)].is_finite() {
                return Err(LinalgError::SingularMatrix);
            }
        }
    }

    let residual = (mat * inverse.as_ref() - identity).norm_l2();
    let tolerance = f64::EPSILON.sqrt() * n as f64;
    if residual > tolerance {
        return Err(LinalgError::IllConditioned {
            residual,
            tolerance,
        });
    }

    Ok(inverse)
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_correct_by_norm_unit_rows() {
        let grad = mat![[3.0, 4.0], [0.0, 2.0]];

        let corrected = correct_by_norm(grad.as_ref());

        let tol = 1e-12;
        assert!((corrected[(0, 0)] - 0.6).abs() < tol);
        assert!((corrected[(0, 1)] - 0.8).abs() < tol);
        assert!(corrected[(1, 0)].abs() < tol);
        assert!((corrected[(1, 1)] - 1.0).abs() < tol);
    }

    #[test]
    fn test_correct_by_norm_damps_short_rows() {
        let grad = mat![[0.0, 0.0], [1e-12, -1e-12], [5.0, 0.0]];

        let corrected = correct_by_norm(grad.as_ref());

        // The zero and near-zero rows are damped to zero steps, the long
        // row becomes a unit step.
        assert_eq!(corrected[(0, 0)], 0.0);
        assert_eq!(corrected[(0, 1)], 0.0);
        assert_eq!(corrected[(1, 0)], 0.0);
        assert_eq!(corrected[(1, 1)], 0.0);
        assert!((corrected[(2, 0)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_jump_norm_multipliers() {
        let mat = mat![[1.0, 3.0, 4.0], [1.0, 0.3, 0.4], [0.5, 0.0, 0.0]];

        let norm_ = jump_norm(mat.as_ref(), 1.0);

        let tol = 1e-12;
        // Row 0 is already long enough, row 1 gets pushed out to radius 1,
        // the zero row stays untouched.
        assert_eq!(norm_[(0, 0)], 1.0);
        assert_eq!(norm_[(0, 1)], 1.0);
        assert_eq!(norm_[(0, 2)], 1.0);
        assert_eq!(norm_[(1, 0)], 1.0);
        assert!((norm_[(1, 1)] - 2.0).abs() < tol);
        assert!((norm_[(1, 2)] - 2.0).abs() < tol);
        assert_eq!(norm_[(2, 1)], 1.0);
        assert_eq!(norm_[(2, 2)], 1.0);
    }

    #[test]
    fn test_count_negative() {
        let mat = mat![[1.0, -2.0, 0.0], [-0.5, 3.0, -1e-9]];

        assert_eq!(count_negative(mat.as_ref()), 3);
    }

    #[test]
    fn test_checked_inverse_round_trip() {
        let x = mat![[2.0, 1.0], [1.0, 3.0]];

        let inverse = checked_inverse(x.as_ref()).unwrap();
        let back = checked_inverse(inverse.as_ref()).unwrap();

        let tol = 1e-10;
        for i in 0..2 {
            for j in 0..2 {
                assert!((back[(i, j)] - x[(i, j)]).abs() < tol);
            }
        }
    }

    #[test]
    fn test_checked_inverse_identity_residual() {
        let x = mat![[4.0, 1.0], [2.0, 3.0]];

        let inverse = checked_inverse(x.as_ref()).unwrap();
        let product = &x * &inverse;

        let tol = 1e-12;
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product[(i, j)] - expected).abs() < tol);
            }
        }
    }

    #[test]
    fn test_checked_inverse_rejects_singular() {
        let singular = mat![[1.0, 1.0], [1.0, 1.0]];

        assert!(checked_inverse(singular.as_ref()).is_err());
    }

    #[test]
    fn test_checked_inverse_rejects_near_singular() {
        let near_singular = mat![[1.0, 1.0], [1.0, 1.0 + 1e-12]];

        assert!(checked_inverse(near_singular.as_ref()).is_err());
    }
}
