use crate::errors::{Result, TcrfrError};
use crate::feature_map::JointFeatures;
use crate::problem::Problem;

/// Latent assignment of every vertex, with the previous assignment and the
/// vertices whose state must not change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LatentState {
    latent: Vec<usize>,
    latent_prev: Vec<usize>,
    fixed: Vec<bool>,
}

impl LatentState {
    /// Creates an assignment of state 0 to `n_vertices` free vertices.
    pub fn new(n_vertices: usize) -> Self {
        Self {
            latent: vec![0; n_vertices],
            latent_prev: vec![0; n_vertices],
            fixed: vec![false; n_vertices],
        }
    }

    /// Returns the current states.
    #[inline(always)]
    pub fn latent(&self) -> &[usize] {
        &self.latent
    }

    /// Returns the states before the last inference step.
    #[inline(always)]
    pub fn latent_prev(&self) -> &[usize] {
        &self.latent_prev
    }

    /// Returns `true` if the state of `vertex` is fixed.
    #[inline(always)]
    pub fn is_fixed(&self, vertex: usize) -> bool {
        self.fixed[vertex]
    }

    /// Sets the state of a free vertex.
    ///
    /// Returns `false` and leaves the state untouched if the vertex is fixed.
    #[inline(always)]
    pub fn assign(&mut self, vertex: usize, state: usize) -> bool {
        if self.fixed[vertex] {
            return false;
        }
        self.latent[vertex] = state;
        true
    }

    /// Sets the state of a vertex and marks it as fixed.
    pub(crate) fn fix(&mut self, vertex: usize, state: usize) {
        self.latent[vertex] = state;
        self.fixed[vertex] = true;
    }

    /// Replaces the current states, keeping fixed vertices.
    ///
    /// # Errors
    ///
    /// `latent` must have one entry per vertex.
    pub fn assign_all(&mut self, latent: &[usize]) -> Result<()> {
        if latent.len() != self.latent.len() {
            return Err(TcrfrError::dimension_mismatch(
                "latent assignment",
                self.latent.len(),
                latent.len(),
            ));
        }
        for (v, &s) in latent.iter().enumerate() {
            self.assign(v, s);
        }
        Ok(())
    }

    /// Stores the current states as the previous ones.
    pub(crate) fn remember(&mut self) {
        self.latent_prev.copy_from_slice(&self.latent);
    }

    /// Returns the number of vertices whose state changed since [`LatentState::latent_prev`].
    pub fn latent_diff(&self) -> usize {
        self.latent
            .iter()
            .zip(&self.latent_prev)
            .filter(|(a, b)| a != b)
            .count()
    }

    /// Returns the number of distinct states in use.
    pub fn n_distinct(&self) -> usize {
        let mut used = vec![];
        for &s in &self.latent {
            if used.len() <= s {
                used.resize(s + 1, false);
            }
            used[s] = true;
        }
        used.into_iter().filter(|&x| x).count()
    }
}

/// Latent-state inference and log-partition of the CRF.
///
/// This is the structure-specific part of the model, such as an exact
/// chain solver or an approximate solver for general graphs. All
/// parameter vectors given to these methods are unpacked.
pub trait LatentInference {
    /// Computes the MAP latent states for the regression weights `u` and the
    /// CRF weights `v`.
    ///
    /// Implementations update `state` through [`LatentState::assign`] and
    /// return the joint feature maps of the new assignment, usually via
    /// [`Problem::joint_feature_map`].
    fn map_inference(
        &self,
        problem: &Problem,
        u: &[f64],
        v: &[f64],
        state: &mut LatentState,
    ) -> Result<JointFeatures>;

    /// Returns the log-normalizer of the CRF at `v`.
    fn log_partition(&self, problem: &Problem, v: &[f64]) -> f64;

    /// Returns the gradient of [`LatentInference::log_partition`] at `v`.
    ///
    /// `None` means no analytic derivative is available; the CRF update then
    /// falls back to finite differences.
    fn log_partition_derivative(&self, _problem: &Problem, _v: &[f64]) -> Option<Vec<f64>> {
        None
    }
}

impl<T> LatentInference for &T
where
    T: LatentInference + ?Sized,
{
    fn map_inference(
        &self,
        problem: &Problem,
        u: &[f64],
        v: &[f64],
        state: &mut LatentState,
    ) -> Result<JointFeatures> {
        (**self).map_inference(problem, u, v, state)
    }

    fn log_partition(&self, problem: &Problem, v: &[f64]) -> f64 {
        (**self).log_partition(problem, v)
    }

    fn log_partition_derivative(&self, problem: &Problem, v: &[f64]) -> Option<Vec<f64>> {
        (**self).log_partition_derivative(problem, v)
    }
}
