use faer::{Mat, MatRef};
use rayon::iter::*;

use crate::{assert_mat_mul, assert_same_ncols};

/// Default violation threshold handed to the hinge sub-gradients by the
/// alternating descent loop.
pub const DEFAULT_HINGE_PRECISION: f64 = 0.0;

///////////////////
// Hinge penalty //
///////////////////

/// One-sided L1 penalty of a matrix
///
/// Sums the absolute values of all strictly negative entries; zero and
/// positive entries contribute nothing.
///
/// ### Params
///
/// * `mat` - The matrix to penalise
///
/// ### Returns
///
/// The accumulated penalty. Always `>= 0`, and `0` iff no entry is negative.
pub fn hinge_penalty(mat: MatRef<f64>) -> f64 {
    (0..mat.ncols())
        .into_par_iter()
        .map(|j| {
            mat.col(j)
                .iter()
                .filter(|&&x| x < 0.0)
                .map(|x| -x)
                .sum::<f64>()
        })
        .sum()
}

///////////////////
// Sub-gradients //
///////////////////

/// Hinge sub-gradient with respect to a left factor
///
/// For `H = L * R`, returns the derivative of `hinge_penalty(H)` with respect
/// to `L`: entry `(i, k)` accumulates `-R(k, j)` over every column `j` where
/// `H(i, j) < 0`. Only `H` and `R` are needed, the left factor itself drops
/// out of the derivative.
///
/// The `precision` argument is part of the call contract but does not enter
/// the negativity test, which is a hard `< 0`.
///
/// ### Params
///
/// * `h` - The projected matrix `L * R` (`m x g`)
/// * `r` - The projection matrix (`k x g`)
///
/// ### Returns
///
/// The `m x k` sub-gradient with respect to `L`.
pub fn hinge_grad_proportions(h: MatRef<f64>, r: MatRef<f64>, _precision: f64) -> Mat<f64> {
    assert_same_ncols!(h, r);

    let violations = Mat::from_fn(
        h.nrows(),
        h.ncols(),
        |i, j| if h[(i, j)] < 0.0 { 1.0 } else { 0.0 },
    );

    (violations * r.transpose()) * -1.0
}

/// Hinge sub-gradient with respect to a right factor
///
/// For `W = S^T * Omega`, returns the derivative of `hinge_penalty(W)` with
/// respect to `Omega`: entry `(k, j)` accumulates `-S(k, i)` over every row
/// `i` where `W(i, j) < -precision`. Unlike [`hinge_grad_proportions`] the
/// violation test is thresholded, not a hard zero.
///
/// ### Params
///
/// * `w` - The projected matrix `S^T * Omega` (`g x n`)
/// * `s` - The projection matrix (`k x g`)
/// * `precision` - Entries below `-precision` count as violations
///
/// ### Returns
///
/// The `k x n` sub-gradient with respect to `Omega`.
pub fn hinge_grad_basis(w: MatRef<f64>, s: MatRef<f64>, precision: f64) -> Mat<f64> {
    assert_mat_mul!(s, w);

    let violations = Mat::from_fn(
        w.nrows(),
        w.ncols(),
        |i, j| if w[(i, j)] < -precision { 1.0 } else { 0.0 },
    );

    (s * violations) * -1.0
}

///////////
// Tests //
///////////
