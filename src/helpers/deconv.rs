use faer::{Mat, MatRef};
use thiserror::Error;

use crate::helpers::hinge::{
    hinge_grad_basis, hinge_grad_proportions, hinge_penalty, DEFAULT_HINGE_PRECISION,
};
use crate::helpers::linalg::{checked_inverse, correct_by_norm, count_negative, LinalgError};
use crate::utils::general::{
    faer_column_from_vec, faer_diagonal_from_vec, reciprocal_diagonal, row_sums_mat,
};

//////////////////////////////
// ENUMS, TYPES, STRUCTURES //
//////////////////////////////

/// Number of columns of the per-iteration diagnostics table.
pub const ERROR_STATISTICS_COLS: usize = 9;

/// Failures of the alternating descent stage
#[derive(Error, Debug)]
pub enum DeconvError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("iteration {iteration}: factor inversion failed: {source}")]
    SingularFactor {
        iteration: usize,
        #[source]
        source: LinalgError,
    },

    #[error("iteration {iteration}: derived scale entry {index} is {value}, must be strictly positive")]
    NonPositiveScale {
        iteration: usize,
        index: usize,
        value: f64,
    },
}

/// Structure with the parameters of the alternating descent stage
///
/// ### Fields
///
/// * `coef_der_x` - Step coefficient for the proportions factor update.
/// * `coef_der_omega` - Step coefficient for the basis factor update.
/// * `coef_hinge_h` - Weight of the negativity penalty on `X * R`.
/// * `coef_hinge_w` - Weight of the negativity penalty on `S^T * Omega`.
/// * `coef_pos_d_h` - Weight of the `D_h` sum-consistency penalty.
/// * `coef_pos_d_w` - Weight of the `D_w` sum-consistency penalty.
/// * `cell_types` - Dimension of the square factors, used to size the
///   per-iteration snapshot tables.
/// * `n_samples` - Sample-count normaliser applied to the first column of
///   the proportions factor.
/// * `n_features` - Feature-count normaliser applied to the first row of
///   the basis factor.
/// * `iterations` - Number of alternating iterations to run. The loop
///   always runs the full count, there is no convergence early-exit.
/// * `mean_radius_x` - Step radius applied to the normalised `X` gradient.
/// * `mean_radius_omega` - Step radius applied to the normalised `Omega`
///   gradient.
/// * `r_const_x` - Legacy radius bound, accepted but not consumed here.
/// * `r_const_omega` - Legacy radius bound, accepted but not consumed here.
/// * `thresh` - Legacy update threshold, accepted but not consumed here.
#[derive(Clone, Debug)]
pub struct DescentParams {
    pub coef_der_x: f64,
    pub coef_der_omega: f64,
    pub coef_hinge_h: f64,
    pub coef_hinge_w: f64,
    pub coef_pos_d_h: f64,
    pub coef_pos_d_w: f64,
    pub cell_types: usize,
    pub n_samples: f64,
    pub n_features: f64,
    pub iterations: usize,
    pub mean_radius_x: f64,
    pub mean_radius_omega: f64,
    pub r_const_x: f64,
    pub r_const_omega: f64,
    pub thresh: f64,
}

/// Per-term loss breakdown of the current factor estimates
///
/// ### Fields
///
/// * `deconv_error` - Squared Frobenius distance between the observation
///   and the reconstruction `Omega * diag(D_w) * X`.
/// * `lambda_error` - Weighted negativity penalty on `X * R`.
/// * `beta_error` - Weighted negativity penalty on `S^T * Omega`.
/// * `d_h_error` - Weighted `X^T * D_h` sum-consistency penalty.
/// * `d_w_error` - Weighted `Omega * D_w` sum-consistency penalty.
/// * `total_error` - Sum of the five terms above.
#[derive(Clone, Copy, Debug)]
pub struct ErrorBreakdown {
    pub deconv_error: f64,
    pub lambda_error: f64,
    pub beta_error: f64,
    pub d_h_error: f64,
    pub d_w_error: f64,
    pub total_error: f64,
}

/// Results structure of the alternating descent stage
///
/// ### Fields
///
/// * `x` - The final de-scaled proportions factor.
/// * `omega` - The final de-scaled basis factor.
/// * `d_w` - The final derived scale vector.
/// * `d_h` - The final derived dual scale vector.
/// * `errors_statistics` - `iterations x 9` table with one row per
///   iteration: `deconv_error`, `lambda_error`, `beta_error`, `d_h_error`,
///   `d_w_error`, `total_error`, negative-entry count of the proportions
///   projection, negative-entry count of the basis projection, and the mean
///   of `D_w`.
/// * `points_x` - `iterations x cell_types^2` snapshots of the de-scaled
///   proportions factor, flattened column-major.
/// * `points_omega` - `iterations x cell_types^2` snapshots of the
///   de-scaled basis factor, flattened column-major.
#[derive(Clone, Debug)]
pub struct DescentResults {
    pub x: Mat<f64>,
    pub omega: Mat<f64>,
    pub d_w: Vec<f64>,
    pub d_h: Vec<f64>,
    pub errors_statistics: Mat<f64>,
    pub points_x: Mat<f64>,
    pub points_omega: Mat<f64>,
}

//////////////
// Observer //
//////////////

/// Sink for intermediate solver state
///
/// The solver reports intermediate scalars, vectors and matrices through
/// this trait instead of writing to any particular output stream. All
/// methods default to doing nothing; dropping every report never changes
/// numerical results.
pub trait DescentObserver {
    fn scalar(&self, _label: &str, _value: f64) {}

    fn vector(&self, _label: &str, _values: &[f64]) {}

    fn matrix(&self, _label: &str, _mat: MatRef<f64>) {}
}

/// Observer that discards every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl DescentObserver for NoopObserver {}

/// Observer that forwards every report to the `log` crate at trace level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl DescentObserver for LogObserver {
    fn scalar(&self, label: &str, value: f64) {
        log::trace!("{}: {:?}", label, value);
    }

    fn vector(&self, label: &str, values: &[f64]) {
        log::trace!("{}: {:?}", label, values);
    }

    fn matrix(&self, label: &str, mat: MatRef<f64>) {
        log::trace!("{}: {:?}", label, mat);
    }
}

//////////////////////
// Error accounting //
//////////////////////

/// Loss breakdown for the current factor estimates
///
/// Computes the reconstruction error, the two hinge penalties on the
/// constrained projections and the two scale-consistency penalties, plus
/// their total. `coef_der_x` and `coef_der_omega` take no part in the error
/// formula; they stay in the signature so the call contract matches the
/// descent stage's coefficient set.
///
/// ### Params
///
/// * `x` - Current proportions factor.
/// * `omega` - Current basis factor.
/// * `d_w` - Current scale vector, used as `diag(d_w)`.
/// * `d_h` - Current dual scale vector.
/// * `svrt` - The observed diagonal factor matrix.
/// * `r` - Fixed membership matrix of the proportions projection.
/// * `s` - Fixed weight matrix of the basis projection.
/// * `coef` - Overall multiplier applied to both hinge terms.
///
/// ### Returns
///
/// The `ErrorBreakdown` with `total_error` equal to the sum of the other
/// five terms.
#[allow(clippy::too_many_arguments)]
pub fn calc_errors(
    x: MatRef<f64>,
    omega: MatRef<f64>,
    d_w: &[f64],
    d_h: &[f64],
    svrt: MatRef<f64>,
    r: MatRef<f64>,
    s: MatRef<f64>,
    coef: f64,
    _coef_der_x: f64,
    _coef_der_omega: f64,
    coef_hinge_h: f64,
    coef_hinge_w: f64,
    coef_pos_d_h: f64,
    coef_pos_d_w: f64,
) -> ErrorBreakdown {
    let d_w_diag = faer_diagonal_from_vec(d_w.to_vec());

    let reconstruction = omega * d_w_diag.as_ref() * x;
    let deconv_error = (svrt.to_owned() - reconstruction).norm_l2().powi(2);

    let lambda_error = coef * coef_hinge_h * hinge_penalty((x * r).as_ref());
    let beta_error = coef * coef_hinge_w * hinge_penalty((s.transpose() * omega).as_ref());

    let sum_rows_r = row_sums_mat(r);
    let sum_rows_s = row_sums_mat(s);

    let d_h_col = faer_column_from_vec(d_h);
    let d_w_col = faer_column_from_vec(d_w);

    let d_h_error = coef_pos_d_h
        * (x.transpose() * d_h_col.as_ref() - sum_rows_r)
            .norm_l2()
            .powi(2);
    let d_w_error = coef_pos_d_w
        * (omega * d_w_col.as_ref() - sum_rows_s).norm_l2().powi(2);

    let total_error = deconv_error + lambda_error + beta_error + d_h_error + d_w_error;

    ErrorBreakdown {
        deconv_error,
        lambda_error,
        beta_error,
        d_h_error,
        d_w_error,
        total_error,
    }
}

////////////////
// Validation //
////////////////

/// Reject malformed inputs before any numeric work happens.
fn validate_inputs(
    x: MatRef<f64>,
    omega: MatRef<f64>,
    d_w: &[f64],
    svrt: MatRef<f64>,
    r: MatRef<f64>,
    s: MatRef<f64>,
    params: &DescentParams,
) -> Result<(), DeconvError> {
    if x.nrows() != x.ncols() {
        return Err(DeconvError::ShapeMismatch(format!(
            "proportions factor must be square, got {}x{}",
            x.nrows(),
            x.ncols()
        )));
    }

    let n = x.nrows();

    if params.cell_types != n {
        return Err(DeconvError::ShapeMismatch(format!(
            "cell_types is {} but the factors are {}x{}",
            params.cell_types, n, n
        )));
    }
    if omega.nrows() != n || omega.ncols() != n {
        return Err(DeconvError::ShapeMismatch(format!(
            "basis factor must be {}x{}, got {}x{}",
            n,
            n,
            omega.nrows(),
            omega.ncols()
        )));
    }
    if svrt.nrows() != n || svrt.ncols() != n {
        return Err(DeconvError::ShapeMismatch(format!(
            "observed factor matrix must be {}x{}, got {}x{}",
            n,
            n,
            svrt.nrows(),
            svrt.ncols()
        )));
    }
    if d_w.len() != n {
        return Err(DeconvError::ShapeMismatch(format!(
            "scale vector must have {} entries, got {}",
            n,
            d_w.len()
        )));
    }
    if r.nrows() != n {
        return Err(DeconvError::ShapeMismatch(format!(
            "membership matrix R must have {} rows, got {}",
            n,
            r.nrows()
        )));
    }
    if s.nrows() != n {
        return Err(DeconvError::ShapeMismatch(format!(
            "weight matrix S must have {} rows, got {}",
            n,
            s.nrows()
        )));
    }

    if params.iterations < 1 {
        return Err(DeconvError::InvalidParameter(format!(
            "iterations must be >= 1, got {}",
            params.iterations
        )));
    }
    if !(params.n_samples > 0.0) {
        return Err(DeconvError::InvalidParameter(format!(
            "n_samples must be > 0, got {}",
            params.n_samples
        )));
    }
    if !(params.n_features > 0.0) {
        return Err(DeconvError::InvalidParameter(format!(
            "n_features must be > 0, got {}",
            params.n_features
        )));
    }
    for (idx, value) in d_w.iter().enumerate() {
        if !(*value > 0.0) {
            return Err(DeconvError::InvalidParameter(format!(
                "scale vector entry {} is {}, must be strictly positive",
                idx, value
            )));
        }
    }

    Ok(())
}

///////////////////////////
// Alternating iteration //
///////////////////////////

/// Alternating gradient descent on the dual factor pair
///
/// Convenience wrapper around [`alternating_descent_with_observer`] that
/// discards all intermediate reports.
#[allow(clippy::too_many_arguments)]
pub fn alternating_descent(
    x: MatRef<f64>,
    omega: MatRef<f64>,
    d_w: &[f64],
    svrt: MatRef<f64>,
    r: MatRef<f64>,
    s: MatRef<f64>,
    params: &DescentParams,
) -> Result<DescentResults, DeconvError> {
    alternating_descent_with_observer(x, omega, d_w, svrt, r, s, params, &NoopObserver)
}

/// Alternating gradient descent on the dual factor pair
///
/// Rescales the initial factors into a conditioned tilde space, then for a
/// fixed number of iterations alternately pushes the proportions factor
/// along its hinge sub-gradient, recovers the basis factor by inversion,
/// pushes the basis factor along its own sub-gradient and recovers the
/// proportions factor by inversion. The two factors stay exact mutual
/// inverses at the two inversion checkpoints of every iteration; a factor
/// that stops being invertible fails the whole run.
///
/// The scale vectors are re-derived each iteration from the first column of
/// the proportions factor and the first row of the basis factor, and the
/// de-scaled factors, the loss breakdown and the negativity diagnostics are
/// recorded per iteration.
///
/// ### Params
///
/// * `x` - Initial proportions factor (square).
/// * `omega` - Initial basis factor (square, same dimension).
/// * `d_w` - Initial scale vector, strictly positive.
/// * `svrt` - Observed diagonal factor matrix.
/// * `r` - Fixed membership matrix of the proportions projection.
/// * `s` - Fixed weight matrix of the basis projection.
/// * `params` - The `DescentParams` for the run.
/// * `observer` - Sink for intermediate state.
///
/// ### Returns
///
/// The `DescentResults` with the final factors, final scale vectors and the
/// per-iteration statistics tables, or the `DeconvError` describing the
/// fatal condition that aborted the run.
#[allow(clippy::too_many_arguments)]
pub fn alternating_descent_with_observer(
    x: MatRef<f64>,
    omega: MatRef<f64>,
    d_w: &[f64],
    svrt: MatRef<f64>,
    r: MatRef<f64>,
    s: MatRef<f64>,
    params: &DescentParams,
    observer: &dyn DescentObserver,
) -> Result<DescentResults, DeconvError> {
    validate_inputs(x, omega, d_w, svrt, r, s, params)?;

    let n = params.cell_types;
    let iterations = params.iterations;
    let scale_ratio = params.n_samples / params.n_features;

    let mut errors_statistics = Mat::<f64>::zeros(iterations, ERROR_STATISTICS_COLS);
    let mut points_x = Mat::<f64>::zeros(iterations, n * n);
    let mut points_omega = Mat::<f64>::zeros(iterations, n * n);

    let sqrt_n = params.n_samples.sqrt();
    let sqrt_m = params.n_features.sqrt();
    observer.scalar("sqrt_n", sqrt_n);
    observer.scalar("sqrt_m", sqrt_m);

    let sigma: Vec<f64> = (0..n).map(|i| svrt[(i, i)]).collect();
    let sqrt_sigma: Vec<f64> = sigma.iter().map(|v| v.sqrt()).collect();
    let sqrt_d_w: Vec<f64> = d_w.iter().map(|v| v.sqrt()).collect();
    observer.vector("sqrt_sigma", &sqrt_sigma);
    observer.vector("sqrt_d_w", &sqrt_d_w);

    observer.matrix("x", x);
    observer.matrix("omega", omega);

    let sqrt_sigma_diag = faer_diagonal_from_vec(sqrt_sigma.clone());
    let inv_sqrt_sigma_diag = reciprocal_diagonal(&sqrt_sigma);

    // Rescale into the conditioned tilde space.
    let mut new_x = faer_diagonal_from_vec(sqrt_d_w.clone()) * x * inv_sqrt_sigma_diag.as_ref();
    let mut new_omega =
        &inv_sqrt_sigma_diag * omega * faer_diagonal_from_vec(sqrt_d_w.clone());

    observer.matrix("x_tilde", new_x.as_ref());
    observer.matrix("omega_tilde", new_omega.as_ref());

    let mut new_d_w: Vec<f64> = d_w.to_vec();
    let mut new_d_h: Vec<f64> = new_d_w.iter().map(|v| v * scale_ratio).collect();

    let mut final_x = x.to_owned();
    let mut final_omega = omega.to_owned();

    for itr in 0..iterations {
        observer.scalar("iteration", itr as f64);

        // Proportions half-step.
        let h = &new_x * &sqrt_sigma_diag * r;
        let der_x = params.coef_hinge_h
            * (hinge_grad_proportions(h.as_ref(), r, DEFAULT_HINGE_PRECISION)
                * inv_sqrt_sigma_diag.as_ref());
        observer.matrix("der_x", der_x.as_ref());

        let der_x = correct_by_norm(der_x.as_ref()) * params.mean_radius_x;
        observer.matrix("der_x_corrected", der_x.as_ref());

        new_x = new_x - der_x * params.coef_der_x;
        observer.matrix("x_tilde_updated", new_x.as_ref());

        new_omega = checked_inverse(new_x.as_ref())
            .map_err(|source| DeconvError::SingularFactor { iteration: itr, source })?;
        observer.matrix("omega_tilde_from_inverse", new_omega.as_ref());

        // Scales implied by the updated proportions factor and its inverse.
        // Diagnostic at this point; the carried values are re-derived after
        // the basis half-step.
        let d_w_x_sqrt: Vec<f64> = (0..n)
            .map(|i| new_x[(i, 0)] * sqrt_sigma[0] * sqrt_n)
            .collect();
        let d_w_x: Vec<f64> = d_w_x_sqrt.iter().map(|v| v * v).collect();
        observer.vector("d_w_from_x", &d_w_x);

        let d_w_omega_sqrt: Vec<f64> = (0..n)
            .map(|j| new_omega[(0, j)] * sqrt_sigma[0] * sqrt_m)
            .collect();
        let d_w_omega: Vec<f64> = d_w_omega_sqrt.iter().map(|v| v * v).collect();
        observer.vector("d_w_from_omega", &d_w_omega);

        // Basis half-step.
        let w = s.transpose() * sqrt_sigma_diag.as_ref() * new_omega.as_ref();
        let grad_basis = hinge_grad_basis(w.as_ref(), s, DEFAULT_HINGE_PRECISION);
        let der_omega = params.coef_hinge_w * (&inv_sqrt_sigma_diag * grad_basis.as_ref());
        observer.matrix("der_omega", der_omega.as_ref());

        let der_omega = correct_by_norm(der_omega.as_ref()) * params.mean_radius_omega;
        observer.matrix("der_omega_corrected", der_omega.as_ref());

        new_omega = new_omega - der_omega * params.coef_der_omega;
        observer.matrix("omega_tilde_updated", new_omega.as_ref());

        new_x = checked_inverse(new_omega.as_ref())
            .map_err(|source| DeconvError::SingularFactor { iteration: itr, source })?;
        observer.matrix("x_tilde_from_inverse", new_x.as_ref());

        // Re-derive the carried scales from the post-update factors. The
        // carried value is the square of the already-squared first-column
        // amplitude.
        let d_w_omega_sqrt: Vec<f64> = (0..n)
            .map(|j| new_omega[(0, j)] * sqrt_sigma[0] * sqrt_m)
            .collect();
        let d_w_omega: Vec<f64> = d_w_omega_sqrt.iter().map(|v| v * v).collect();
        observer.vector("d_w_from_omega_updated", &d_w_omega);

        let d_w_x_sqrt: Vec<f64> = (0..n)
            .map(|i| new_x[(i, 0)] * sqrt_sigma[0] * sqrt_n)
            .collect();
        let d_w_x: Vec<f64> = d_w_x_sqrt.iter().map(|v| v * v).collect();
        observer.vector("d_w_from_x_updated", &d_w_x);

        new_d_w = d_w_x.iter().map(|v| v * v).collect();
        new_d_h = new_d_w.iter().map(|v| v * scale_ratio).collect();
        observer.vector("d_w", &new_d_w);

        if let Some(idx) = new_d_w.iter().position(|v| !(*v > 0.0)) {
            return Err(DeconvError::NonPositiveScale {
                iteration: itr,
                index: idx,
                value: new_d_w[idx],
            });
        }

        let neg_props = count_negative((&new_x * r).as_ref());
        let neg_basis = count_negative((s.transpose() * new_omega.as_ref()).as_ref());
        let sum_ = new_d_w.iter().sum::<f64>() / params.n_features;

        // De-scale to the reportable factors.
        let inv_d_w_diag = reciprocal_diagonal(&new_d_w);
        final_x = &inv_d_w_diag * &new_x * sqrt_sigma_diag.as_ref();
        observer.matrix("final_x", final_x.as_ref());
        final_omega = &sqrt_sigma_diag * &new_omega * inv_d_w_diag.as_ref();
        observer.matrix("final_omega", final_omega.as_ref());

        let current = calc_errors(
            final_x.as_ref(),
            final_omega.as_ref(),
            &new_d_w,
            &new_d_h,
            svrt,
            r,
            s,
            1.0,
            params.coef_der_x,
            params.coef_der_omega,
            params.coef_hinge_h,
            params.coef_hinge_w,
            params.coef_pos_d_h,
            params.coef_pos_d_w,
        );

        errors_statistics[(itr, 0)] = current.deconv_error;
        errors_statistics[(itr, 1)] = current.lambda_error;
        errors_statistics[(itr, 2)] = current.beta_error;
        errors_statistics[(itr, 3)] = current.d_h_error;
        errors_statistics[(itr, 4)] = current.d_w_error;
        errors_statistics[(itr, 5)] = current.total_error;
        errors_statistics[(itr, 6)] = neg_props as f64;
        errors_statistics[(itr, 7)] = neg_basis as f64;
        errors_statistics[(itr, 8)] = sum_;

        let mut flat_idx = 0;
        for j in 0..n {
            for i in 0..n {
                points_x[(itr, flat_idx)] = final_x[(i, j)];
                points_omega[(itr, flat_idx)] = final_omega[(i, j)];
                flat_idx += 1;
            }
        }
    }

    Ok(DescentResults {
        x: final_x,
        omega: final_omega,
        d_w: new_d_w,
        d_h: new_d_h,
        errors_statistics,
        points_x,
        points_omega,
    })
}

///////////
// Tests //
///////////
