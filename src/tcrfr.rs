use crate::errors::{Result, TcrfrError};
use crate::feature_map::JointFeatures;
use crate::inference::{LatentInference, LatentState};
use crate::model::Solution;
use crate::problem::Problem;

#[cfg(feature = "train")]
use crate::trainer::{FitReport, Trainer};

/// Transductive CRF regression over a fixed problem and inference strategy.
///
/// The model owns the latent assignment and the best solution found so far.
/// Only [`Tcrfr::fit`] replaces the solution, and only when the fit did not
/// diverge.
pub struct Tcrfr<I> {
    problem: Problem,
    strategy: I,
    #[cfg(feature = "train")]
    trainer: Trainer,
    state: LatentState,
    solution: Option<Solution>,
    #[cfg(feature = "train")]
    report: Option<FitReport>,
}

impl<I> Tcrfr<I>
where
    I: LatentInference,
{
    /// Creates a new model with every vertex in state 0.
    pub fn new(problem: Problem, strategy: I) -> Self {
        let state = LatentState::new(problem.num_samples());
        Self {
            problem,
            strategy,
            #[cfg(feature = "train")]
            trainer: Trainer::new(),
            state,
            solution: None,
            #[cfg(feature = "train")]
            report: None,
        }
    }

    /// Replaces the trainer settings.
    #[cfg(feature = "train")]
    #[cfg_attr(docsrs, doc(cfg(feature = "train")))]
    pub fn with_trainer(mut self, trainer: Trainer) -> Self {
        self.trainer = trainer;
        self
    }

    /// Returns the problem.
    #[inline(always)]
    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    /// Returns the inference strategy.
    #[inline(always)]
    pub fn strategy(&self) -> &I {
        &self.strategy
    }

    /// Returns the current latent assignment.
    #[inline(always)]
    pub fn latent_state(&self) -> &LatentState {
        &self.state
    }

    /// Returns the best solution found so far.
    #[inline(always)]
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// Returns the trace of the last fit.
    #[cfg(feature = "train")]
    #[cfg_attr(docsrs, doc(cfg(feature = "train")))]
    #[inline(always)]
    pub fn last_report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    /// Fixes the latent state of a vertex, e.g. a labeled vertex of known
    /// regime. Neither the hotstart nor the inference strategy changes it.
    ///
    /// # Errors
    ///
    /// `vertex` and `state` must be in range.
    pub fn fix_latent(&mut self, vertex: usize, state: usize) -> Result<()> {
        if vertex >= self.problem.num_samples() {
            return Err(TcrfrError::invalid_input(format!(
                "vertex {vertex} is out of range for {} samples",
                self.problem.num_samples()
            )));
        }
        if state >= self.problem.num_states() {
            return Err(TcrfrError::invalid_input(format!(
                "latent state {state} is out of range for {} states",
                self.problem.num_states()
            )));
        }
        self.state.fix(vertex, state);
        Ok(())
    }

    /// Installs a solution, e.g. one decoded from a stored model.
    ///
    /// # Errors
    ///
    /// The solution must match the dimensions of the problem.
    pub fn set_solution(&mut self, solution: Solution) -> Result<()> {
        if solution.u().len() != self.problem.num_regression_dims() {
            return Err(TcrfrError::dimension_mismatch(
                "regression weights",
                self.problem.num_regression_dims(),
                solution.u().len(),
            ));
        }
        if solution.v().len() != self.problem.num_compressed_dims() {
            return Err(TcrfrError::dimension_mismatch(
                "packed CRF weights",
                self.problem.num_compressed_dims(),
                solution.v().len(),
            ));
        }
        self.problem.check_latent(solution.latent())?;
        self.state.assign_all(solution.latent())?;
        self.solution = Some(solution);
        Ok(())
    }

    /// Fits the model.
    ///
    /// # Arguments
    ///
    /// * `max_iter` - Maximum number of iterations.
    /// * `hotstart` - Regression weights and packed CRF weights to start
    ///   from. If `None`, a k-means based starting point is computed.
    /// * `use_grads` - Whether the CRF update may use the analytic gradient.
    ///
    /// # Returns
    ///
    /// `true` if the fit converged. On divergence, `false` is returned and
    /// neither the solution nor the latent assignment changes.
    ///
    /// # Errors
    ///
    /// `hotstart` must match the dimensions of the problem; errors of the
    /// inference strategy are propagated.
    #[cfg(feature = "train")]
    #[cfg_attr(docsrs, doc(cfg(feature = "train")))]
    pub fn fit(
        &mut self,
        max_iter: usize,
        hotstart: Option<(Vec<f64>, Vec<f64>)>,
        use_grads: bool,
    ) -> Result<bool> {
        let mut state = self.state.clone();
        let start = match hotstart {
            Some(start) => start,
            None => self
                .trainer
                .hotstart(&self.problem, &self.strategy, &mut state)?,
        };
        let report = self.trainer.fit(
            &self.problem,
            &self.strategy,
            &mut state,
            start,
            max_iter,
            use_grads,
        )?;
        if let Some(solution) = report.solution() {
            self.solution = Some(solution.clone());
            self.state = state;
        }
        let converged = report.converged();
        self.report = Some(report);
        Ok(converged)
    }

    /// Predicts every vertex.
    ///
    /// Uses `latent`, or the latent states of the solution if `None`.
    /// Returns the predictions and the latent states used.
    ///
    /// # Errors
    ///
    /// Returns [`TcrfrError::NotFitted`] if there is no solution yet.
    pub fn predict(&self, latent: Option<&[usize]>) -> Result<(Vec<f64>, Vec<usize>)> {
        let solution = self.solution.as_ref().ok_or(TcrfrError::NotFitted)?;
        let latent = latent.unwrap_or_else(|| solution.latent());
        let vertices: Vec<usize> = (0..self.problem.num_samples()).collect();
        let predictions = solution.predict(&self.problem, latent, &vertices)?;
        Ok((predictions, latent.to_vec()))
    }

    /// Predicts the given vertices.
    ///
    /// # Errors
    ///
    /// See [`Tcrfr::predict`]; every vertex must exist.
    pub fn predict_vertices(
        &self,
        vertices: &[usize],
        latent: Option<&[usize]>,
    ) -> Result<Vec<f64>> {
        let solution = self.solution.as_ref().ok_or(TcrfrError::NotFitted)?;
        let latent = latent.unwrap_or_else(|| solution.latent());
        solution.predict(&self.problem, latent, vertices)
    }

    /// Returns the joint feature maps of the current latent assignment.
    pub fn joint_feature_maps(&self) -> Result<JointFeatures> {
        self.problem.joint_feature_map(self.state.latent())
    }
}
