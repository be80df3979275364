use nalgebra::{DMatrix, DVector};

use crate::errors::{Result, TcrfrError};

/// Solves the ridge regression restricted to the labeled vertices.
///
/// Minimizes `|y - X u|^2 / 2 + lambda |u|^2 / 2`, where row `r` of `X` is
/// column `label_inds[r]` of `phis`, through the normal equations. Returns the
/// objective at the optimum and the optimal `u`.
pub fn estimate_regression_weights(
    phis: &DMatrix<f64>,
    labels: &[f64],
    label_inds: &[usize],
    lambda: f64,
) -> Result<(f64, Vec<f64>)> {
    if labels.len() != label_inds.len() {
        return Err(TcrfrError::dimension_mismatch(
            "labels",
            label_inds.len(),
            labels.len(),
        ));
    }
    let dims = phis.nrows();
    let x = DMatrix::from_fn(label_inds.len(), dims, |r, c| phis[(c, label_inds[r])]);
    let y = DVector::from_column_slice(labels);

    let xty = x.tr_mul(&y);
    let xtx = x.tr_mul(&x);
    let mut gram = xtx.clone();
    for i in 0..dims {
        gram[(i, i)] += lambda;
    }

    let u = if dims == 1 {
        xty.unscale(gram[(0, 0)])
    } else if let Some(cholesky) = gram.clone().cholesky() {
        cholesky.solve(&xty)
    } else {
        gram.lu()
            .solve(&xty)
            .ok_or_else(|| TcrfrError::solver("regularized Gram matrix is singular"))?
    };

    let obj = lambda / 2.0 * u.dot(&u) + y.dot(&y) / 2.0 - u.dot(&xty) + u.dot(&(&xtx * &u)) / 2.0;
    Ok((obj, u.as_slice().to_vec()))
}
