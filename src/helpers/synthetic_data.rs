use faer::Mat;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use crate::helpers::linalg::checked_inverse;

//////////////////////////////
// ENUMS, TYPES, STRUCTURES //
//////////////////////////////

/// A generated deconvolution problem instance
///
/// ### Fields
///
/// * `x` - Invertible proportions factor with a strictly positive first
///   column.
/// * `omega` - The matching basis factor, `x^-1`.
/// * `d_w` - Strictly positive scale vector.
/// * `svrt` - Diagonal observed factor matrix with a decreasing positive
///   spectrum.
/// * `r` - Non-negative membership matrix, `cell_types x n_samples`.
/// * `s` - Non-negative weight matrix, `cell_types x n_features`.
#[derive(Clone, Debug)]
pub struct SyntheticProblem {
    pub x: Mat<f64>,
    pub omega: Mat<f64>,
    pub d_w: Vec<f64>,
    pub svrt: Mat<f64>,
    pub r: Mat<f64>,
    pub s: Mat<f64>,
}

/////////////////////////
// Problem generation //
/////////////////////////

/// Generate a well-posed random deconvolution problem
///
/// The proportions factor is the identity plus small Gaussian noise, which
/// keeps it comfortably invertible, and its first column is forced strictly
/// positive so the derived scale vectors stay valid. The basis factor is its
/// exact inverse.
///
/// ### Params
///
/// * `cell_types` - Dimension of the square factors.
/// * `n_samples` - Number of columns of the membership matrix `r`.
/// * `n_features` - Number of columns of the weight matrix `s`.
/// * `seed` - Seed for reproducibility purposes.
///
/// ### Returns
///
/// The `SyntheticProblem` with all inputs of the descent stage.
pub fn create_random_problem(
    cell_types: usize,
    n_samples: usize,
    n_features: usize,
    seed: u64,
) -> SyntheticProblem {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.1).unwrap();

    let noise: Vec<f64> = (0..cell_types * cell_types)
        .map(|_| normal.sample(&mut rng))
        .collect();
    let mut x = Mat::from_fn(cell_types, cell_types, |i, j| {
        let base = if i == j { 1.0 } else { 0.0 };
        base + noise[i + j * cell_types]
    });
    for i in 0..cell_types {
        x[(i, 0)] = x[(i, 0)].abs().max(0.05);
    }

    let omega = checked_inverse(x.as_ref()).unwrap();

    let mut sigma: Vec<f64> = (0..cell_types)
        .map(|i| (cell_types - i) as f64 + rng.random_range(0.0..0.5))
        .collect();
    sigma.sort_by(|a, b| b.total_cmp(a));
    let svrt = Mat::from_fn(
        cell_types,
        cell_types,
        |i, j| if i == j { sigma[i] } else { 0.0 },
    );

    let d_w: Vec<f64> = (0..cell_types)
        .map(|_| rng.random_range(0.5..1.5))
        .collect();

    let r_data: Vec<f64> = (0..cell_types * n_samples)
        .map(|_| rng.random_range(0.0..1.0))
        .collect();
    let r = Mat::from_fn(cell_types, n_samples, |i, j| r_data[i + j * cell_types]);

    let s_data: Vec<f64> = (0..cell_types * n_features)
        .map(|_| rng.random_range(0.0..1.0))
        .collect();
    let s = Mat::from_fn(cell_types, n_features, |i, j| s_data[i + j * cell_types]);

    SyntheticProblem {
        x,
        omega,
        d_w,
        svrt,
        r,
        s,
    }
}

///////////
// Tests //
///////////
