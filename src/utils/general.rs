use faer::{Mat, MatRef};

////////////////////
// Matrix helpers //
////////////////////

/// Create a diagonal faer matrix from a vector
///
/// ### Params
///
/// * `vec` - The diagonal values
///
/// ### Returns
///
/// A square matrix with `vec` on the diagonal and zeros elsewhere.
pub fn faer_diagonal_from_vec(vec: Vec<f64>) -> Mat<f64> {
    let n = vec.len();

    Mat::from_fn(n, n, |i, j| if i == j { vec[i] } else { 0.0 })
}

/// Create a diagonal faer matrix of elementwise reciprocals
///
/// The caller is responsible for `values` being non-zero.
///
/// ### Params
///
/// * `values` - The values whose reciprocals form the diagonal
///
/// ### Returns
///
/// A square matrix with `1 / values` on the diagonal and zeros elsewhere.
pub fn reciprocal_diagonal(values: &[f64]) -> Mat<f64> {
    let n = values.len();

    Mat::from_fn(n, n, |i, j| if i == j { 1.0 / values[i] } else { 0.0 })
}

/// Create a faer column vector from a slice
///
/// ### Params
///
/// * `values` - The values of the column
///
/// ### Returns
///
/// A `len x 1` matrix holding `values`.
pub fn faer_column_from_vec(values: &[f64]) -> Mat<f64> {
    Mat::from_fn(values.len(), 1, |i, _| values[i])
}

/// Calculates the row sums of a matrix
///
/// ### Params
///
/// * `mat` - The matrix for which to calculate the row-wise sums
///
/// ### Returns
///
/// The row sums as a `nrows x 1` matrix.
pub fn row_sums_mat(mat: MatRef<f64>) -> Mat<f64> {
    let n_cols = mat.ncols();
    let ones = Mat::from_fn(n_cols, 1, |_, _| 1.0);

    mat * ones
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_faer_diagonal_from_vec() {
        let diag = faer_diagonal_from_vec(vec![2.0, 3.0]);

        assert_eq!(diag.nrows(), 2);
        assert_eq!(diag.ncols(), 2);
        assert_eq!(diag[(0, 0)], 2.0);
        assert_eq!(diag[(1, 1)], 3.0);
        assert_eq!(diag[(0, 1)], 0.0);
        assert_eq!(diag[(1, 0)], 0.0);
    }

    #[test]
    fn test_reciprocal_diagonal() {
        let diag = reciprocal_diagonal(&[2.0, 4.0]);

        assert_eq!(diag[(0, 0)], 0.5);
        assert_eq!(diag[(1, 1)], 0.25);
        assert_eq!(diag[(1, 0)], 0.0);
    }

    #[test]
    fn test_faer_column_from_vec() {
        let col = faer_column_from_vec(&[1.0, 2.0, 3.0]);

        assert_eq!(col.nrows(), 3);
        assert_eq!(col.ncols(), 1);
        assert_eq!(col[(2, 0)], 3.0);
    }

    #[test]
    fn test_row_sums_mat() {
        let mat = mat![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];

        let sums = row_sums_mat(mat.as_ref());

        assert_eq!(sums.nrows(), 2);
        assert_eq!(sums.ncols(), 1);
        assert!((sums[(0, 0)] - 6.0).abs() < 1e-12);
        assert!((sums[(1, 0)] - 15.0).abs() < 1e-12);
    }
}
