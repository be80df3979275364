use bincode::{Decode, Encode};

use crate::errors::{Result, TcrfrError};
use crate::math;
use crate::problem::Problem;

/// Parameters and latent states of a fitted model.
#[derive(Clone, Debug, Decode, Encode, PartialEq)]
pub struct Solution {
    u: Vec<f64>,
    v: Vec<f64>,
    latent: Vec<usize>,
}

impl Solution {
    pub(crate) fn new(u: Vec<f64>, v: Vec<f64>, latent: Vec<usize>) -> Self {
        Self { u, v, latent }
    }

    /// Regression weights, one `feats` block per state.
    #[inline(always)]
    pub fn u(&self) -> &[f64] {
        &self.u
    }

    /// Packed CRF weights.
    #[inline(always)]
    pub fn v(&self) -> &[f64] {
        &self.v
    }

    /// Latent state of every vertex.
    #[inline(always)]
    pub fn latent(&self) -> &[usize] {
        &self.latent
    }

    /// Predicts the target of the given vertices under a latent assignment.
    ///
    /// The prediction of vertex `i` in state `s` is the `s`-th block of `u`
    /// applied to the features of `i`, i.e. `u` applied to column `i` of the
    /// regression design.
    ///
    /// # Errors
    ///
    /// `latent` must be valid for `problem`, and every vertex must exist.
    pub fn predict(
        &self,
        problem: &Problem,
        latent: &[usize],
        vertices: &[usize],
    ) -> Result<Vec<f64>> {
        problem.check_latent(latent)?;
        if self.u.len() != problem.num_regression_dims() {
            return Err(TcrfrError::dimension_mismatch(
                "regression weights",
                problem.num_regression_dims(),
                self.u.len(),
            ));
        }
        let feats = problem.num_feats();
        let data = problem.data();
        vertices
            .iter()
            .map(|&i| {
                if i >= problem.num_samples() {
                    return Err(TcrfrError::invalid_input(format!(
                        "vertex {i} is out of range for {} samples",
                        problem.num_samples()
                    )));
                }
                let start = latent[i] * feats;
                Ok(math::dot(&self.u[start..start + feats], data.column(i).iter()))
            })
            .collect()
    }
}
