use nalgebra::DMatrix;

use crate::errors::{Result, TcrfrError};
use crate::inference::{LatentInference, LatentState};
use crate::kmeans::KMeans;
use crate::model::Solution;
use crate::problem::Problem;
use crate::solvers::{lbfgs, ridge};

/// Relative change of the combined objective below which a fit has converged.
pub const CONVERGENCE_TOL: f64 = 1e-4;

// iteration index from which convergence may be declared
const MIN_ITERATIONS: usize = 4;

const INITIAL_OBJECTIVE: f64 = 1e9;

fn check_state(problem: &Problem, state: &LatentState) -> Result<()> {
    if state.latent().len() != problem.num_samples() {
        return Err(TcrfrError::dimension_mismatch(
            "latent assignment",
            problem.num_samples(),
            state.latent().len(),
        ));
    }
    Ok(())
}

/// How a fit ended.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The relative change of the objective fell below [`CONVERGENCE_TOL`].
    Converged,

    /// The iteration cap was reached first.
    Exhausted,

    /// The combined objective became non-finite.
    Diverged,
}

/// Trace of a fit.
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Debug)]
pub struct FitReport {
    termination: Termination,
    iterations: usize,
    best_iteration: Option<usize>,
    objectives: Vec<f64>,
    best_objectives: Vec<f64>,
    solution: Option<Solution>,
}

impl FitReport {
    /// Returns how the fit ended.
    #[inline(always)]
    pub const fn termination(&self) -> Termination {
        self.termination
    }

    /// Returns `true` if the fit converged.
    #[inline(always)]
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }

    /// Returns the number of completed iterations.
    #[inline(always)]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Returns the iteration of the best snapshot.
    #[inline(always)]
    pub const fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    /// Returns the combined objective of every completed iteration.
    #[inline(always)]
    pub fn objectives(&self) -> &[f64] {
        &self.objectives
    }

    /// Returns the best combined objective seen up to every iteration.
    #[inline(always)]
    pub fn best_objectives(&self) -> &[f64] {
        &self.best_objectives
    }

    /// Returns the best snapshot, or `None` if the fit diverged or ran no
    /// iteration.
    #[inline(always)]
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }
}

/// Trainer for TCRFR
#[cfg_attr(docsrs, doc(cfg(feature = "train")))]
#[derive(Clone, Debug)]
pub struct Trainer {
    lbfgs_max_iter: u64,
    lbfgs_memory: usize,
    kmeans_restarts: usize,
    kmeans_max_iter: usize,
    kmeans_tol: f64,
    seed: u64,
    n_threads: usize,
    verbose: bool,
}

impl Trainer {
    /// Creates a new trainer
    pub fn new() -> Self {
        Self {
            lbfgs_max_iter: 100,
            lbfgs_memory: 7,
            kmeans_restarts: 10,
            kmeans_max_iter: 100,
            kmeans_tol: 1e-4,
            seed: 0,
            n_threads: 1,
            verbose: false,
        }
    }

    /// Sets the maximum number of L-BFGS iterations per CRF update
    pub fn lbfgs_max_iter(mut self, max_iter: u64) -> Result<Self> {
        if max_iter == 0 {
            return Err(TcrfrError::invalid_input("lbfgs_max_iter must not be 0"));
        }
        self.lbfgs_max_iter = max_iter;
        Ok(self)
    }

    /// Sets the L-BFGS history size
    pub fn lbfgs_memory(mut self, memory: usize) -> Result<Self> {
        if memory == 0 {
            return Err(TcrfrError::invalid_input("lbfgs_memory must not be 0"));
        }
        self.lbfgs_memory = memory;
        Ok(self)
    }

    /// Sets the number of k-means restarts of the hotstart
    pub fn kmeans_restarts(mut self, restarts: usize) -> Result<Self> {
        if restarts == 0 {
            return Err(TcrfrError::invalid_input("kmeans_restarts must not be 0"));
        }
        self.kmeans_restarts = restarts;
        Ok(self)
    }

    /// Sets the maximum number of Lloyd iterations per k-means restart
    pub fn kmeans_max_iter(mut self, max_iter: usize) -> Result<Self> {
        if max_iter == 0 {
            return Err(TcrfrError::invalid_input("kmeans_max_iter must not be 0"));
        }
        self.kmeans_max_iter = max_iter;
        Ok(self)
    }

    /// Sets the k-means tolerance, relative to the mean feature variance
    pub fn kmeans_tol(mut self, tol: f64) -> Result<Self> {
        if !(tol >= 0.0 && tol.is_finite()) {
            return Err(TcrfrError::invalid_input(
                "kmeans_tol must be greater than or equal to 0.0",
            ));
        }
        self.kmeans_tol = tol;
        Ok(self)
    }

    /// Sets the seed of the k-means initialization
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the number of threads running k-means restarts
    pub fn n_threads(mut self, n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(TcrfrError::invalid_input("n_threads must not be 0"));
        }
        self.n_threads = n_threads;
        Ok(self)
    }

    /// Attaches a terminal logger to every L-BFGS run
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Minimizes the CRF objective for the sufficient statistics `psi`,
    /// starting from the packed vector `v`.
    pub fn estimate_v<I>(
        &self,
        problem: &Problem,
        strategy: &I,
        v: &[f64],
        psi: &[f64],
        use_grads: bool,
    ) -> Result<(f64, Vec<f64>)>
    where
        I: LatentInference,
    {
        lbfgs::estimate_crf_weights(
            problem,
            strategy,
            v,
            psi,
            use_grads,
            self.lbfgs_max_iter,
            self.lbfgs_memory,
            self.verbose,
        )
    }

    /// Solves the ridge regression of the labeled vertices on the design `phis`.
    pub fn estimate_u(&self, problem: &Problem, phis: &DMatrix<f64>) -> Result<(f64, Vec<f64>)> {
        let dataset = problem.dataset();
        ridge::estimate_regression_weights(
            phis,
            dataset.labels(),
            dataset.label_inds(),
            problem.reg_lambda(),
        )
    }

    /// Computes a starting point `(u, v)` for [`Trainer::fit`].
    ///
    /// Free vertices take the state of their k-means cluster. The CRF weights
    /// are then estimated once from zero without the analytic gradient, and
    /// the regression weights once on the labeled vertices.
    ///
    /// # Errors
    ///
    /// `state` must have one entry per vertex.
    pub fn hotstart<I>(
        &self,
        problem: &Problem,
        strategy: &I,
        state: &mut LatentState,
    ) -> Result<(Vec<f64>, Vec<f64>)>
    where
        I: LatentInference,
    {
        check_state(problem, state)?;
        let clustering = KMeans::new(
            problem.num_states(),
            self.kmeans_restarts,
            self.kmeans_max_iter,
            self.kmeans_tol,
            self.seed,
            self.n_threads,
        )
        .fit(problem.data())?;
        for (vertex, &cluster) in clustering.labels().iter().enumerate() {
            state.assign(vertex, cluster);
        }
        log::debug!(
            "hotstart: k-means inertia {}, {} states in use",
            clustering.inertia(),
            state.n_distinct()
        );

        let feats = problem.joint_feature_map(state.latent())?;
        let v_init = vec![0.0; problem.num_compressed_dims()];
        let (_, v) = self.estimate_v(problem, strategy, &v_init, &feats.psi, false)?;
        let (_, u) = self.estimate_u(problem, &feats.phis)?;
        Ok((u, v))
    }

    /// Alternates latent inference, CRF update and regression update.
    ///
    /// # Arguments
    ///
    /// * `problem` - Problem to fit.
    /// * `strategy` - Latent inference used in every E-step.
    /// * `state` - Latent assignment, updated in place.
    /// * `start` - Regression weights and packed CRF weights to start from.
    /// * `max_iter` - Maximum number of iterations.
    /// * `use_grads` - Whether the CRF update may use the analytic gradient.
    ///
    /// # Errors
    ///
    /// `state` and `start` must match the dimensions of `problem`, and the strategy must
    /// return feature maps of the right shape. A non-finite objective is not
    /// an error; it ends the fit with [`Termination::Diverged`] and no
    /// solution.
    pub fn fit<I>(
        &self,
        problem: &Problem,
        strategy: &I,
        state: &mut LatentState,
        start: (Vec<f64>, Vec<f64>),
        max_iter: usize,
        use_grads: bool,
    ) -> Result<FitReport>
    where
        I: LatentInference,
    {
        check_state(problem, state)?;
        let (mut u, mut v) = start;
        if u.len() != problem.num_regression_dims() {
            return Err(TcrfrError::dimension_mismatch(
                "regression weights",
                problem.num_regression_dims(),
                u.len(),
            ));
        }
        if v.len() != problem.num_compressed_dims() {
            return Err(TcrfrError::dimension_mismatch(
                "packed CRF weights",
                problem.num_compressed_dims(),
                v.len(),
            ));
        }

        let theta = problem.reg_theta();
        let mut obj = INITIAL_OBJECTIVE;
        let mut best_obj = f64::INFINITY;
        let mut best = None;
        let mut best_iteration = None;
        let mut objectives = vec![];
        let mut best_objectives = vec![];
        let mut termination = Termination::Exhausted;

        for cnt_iter in 0..max_iter {
            let obj_old = obj;
            state.remember();

            let vn = problem.unpack(&v)?;
            let feats = strategy.map_inference(problem, &u, &vn, state)?;
            if feats.phis.shape() != (problem.num_regression_dims(), problem.num_samples()) {
                return Err(TcrfrError::dimension_mismatch(
                    "regression design",
                    problem.num_regression_dims() * problem.num_samples(),
                    feats.phis.len(),
                ));
            }
            if feats.psi.len() != problem.num_dims() {
                return Err(TcrfrError::dimension_mismatch(
                    "sufficient statistics",
                    problem.num_dims(),
                    feats.psi.len(),
                ));
            }

            let (obj_crf, v_new) = self.estimate_v(problem, strategy, &v, &feats.psi, use_grads)?;
            v = v_new;
            let (obj_reg, u_new) = self.estimate_u(problem, &feats.phis)?;
            u = u_new;

            obj = theta * obj_reg + (1.0 - theta) * obj_crf;
            if !obj.is_finite() {
                log::warn!("iteration {cnt_iter}: objective is not finite ({obj}), stopping");
                return Ok(FitReport {
                    termination: Termination::Diverged,
                    iterations: cnt_iter,
                    best_iteration: None,
                    objectives,
                    best_objectives,
                    solution: None,
                });
            }
            let rel = if obj_old == obj {
                0.0
            } else {
                (obj_old - obj).abs() / obj.abs()
            };

            if best_obj >= obj {
                best_obj = obj;
                best = Some(Solution::new(u.clone(), v.clone(), state.latent().to_vec()));
                best_iteration = Some(cnt_iter);
            }
            objectives.push(obj);
            best_objectives.push(best_obj);

            log::debug!(
                "iteration {cnt_iter}: obj_reg={obj_reg:.6} obj_crf={obj_crf:.6} obj={obj:.6} \
                 rel={rel:.3e} changes={} states={}",
                state.latent_diff(),
                state.n_distinct()
            );

            if cnt_iter >= MIN_ITERATIONS && rel < CONVERGENCE_TOL {
                termination = Termination::Converged;
                break;
            }
        }

        if let Some(solution) = &best {
            state.assign_all(solution.latent())?;
        }
        log::info!(
            "fit ended ({termination:?}) after {} iterations, best iteration {best_iteration:?} \
             with objective {best_obj}",
            objectives.len()
        );
        Ok(FitReport {
            termination,
            iterations: objectives.len(),
            best_iteration,
            objectives,
            best_objectives,
            solution: best,
        })
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::problem::Hyperparameters;
    use crate::test_utils::{self, IndependentInference};

    #[test]
    fn test_single_state_is_ridge() {
        let hyperparameters = Hyperparameters::new().reg_lambda(0.1).unwrap();
        let problem = test_utils::regime_problem(1, hyperparameters);
        let strategy = IndependentInference::new();
        let trainer = Trainer::new();
        let mut state = LatentState::new(problem.num_samples());

        let start = trainer.hotstart(&problem, &strategy, &mut state).unwrap();
        let report = trainer
            .fit(&problem, &strategy, &mut state, start, 20, true)
            .unwrap();

        assert!(report.converged());
        assert!(report.iterations() <= 20);

        // a single state leaves nothing to infer: the objective is flat from the start
        let objectives = report.objectives();
        for &obj in &objectives[1..] {
            assert!((obj - objectives[0]).abs() < 1e-9 * objectives[0].abs().max(1.0));
        }

        // closed form on the labeled vertices
        let dataset = problem.dataset();
        let x = DMatrix::from_fn(dataset.label_inds().len(), 2, |r, c| {
            problem.data()[(c, dataset.label_inds()[r])]
        });
        let y = nalgebra::DVector::from_column_slice(dataset.labels());
        let mut gram = x.tr_mul(&x);
        gram[(0, 0)] += 0.1;
        gram[(1, 1)] += 0.1;
        let expected = gram.lu().solve(&x.tr_mul(&y)).unwrap();

        let u = report.solution().unwrap().u();
        assert_eq!(2, u.len());
        for (a, b) in u.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn test_best_objective_is_non_increasing() {
        let problem = test_utils::regime_problem(2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let trainer = Trainer::new();
        let mut state = LatentState::new(problem.num_samples());

        let start = trainer.hotstart(&problem, &strategy, &mut state).unwrap();
        let report = trainer
            .fit(&problem, &strategy, &mut state, start, 8, true)
            .unwrap();

        assert_ne!(Termination::Diverged, report.termination());
        assert_eq!(report.iterations(), report.objectives().len());
        assert_eq!(report.iterations(), report.best_objectives().len());
        for w in report.best_objectives().windows(2) {
            assert!(w[1] <= w[0]);
        }
        let best_iteration = report.best_iteration().unwrap();
        assert_eq!(
            report.objectives()[best_iteration],
            *report.best_objectives().last().unwrap()
        );
        assert_eq!(state.latent(), report.solution().unwrap().latent());
    }

    #[test]
    fn test_path_two_states() {
        let problem = test_utils::path_problem(5, 2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let trainer = Trainer::new().seed(3);
        let mut state = LatentState::new(5);

        assert_eq!(3, problem.trans_total_dims());

        let start = trainer.hotstart(&problem, &strategy, &mut state).unwrap();
        assert_eq!(2, start.0.len());
        assert_eq!(problem.num_compressed_dims(), start.1.len());

        let report = trainer
            .fit(&problem, &strategy, &mut state, start, 10, false)
            .unwrap();
        let solution = report.solution().unwrap();
        assert!(problem.check_latent(solution.latent()).is_ok());
        assert_eq!(problem.num_compressed_dims(), solution.v().len());
    }

    #[test]
    fn test_diverged() {
        let problem = test_utils::regime_problem(2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        strategy.poison();
        let trainer = Trainer::new();
        let mut state = LatentState::new(problem.num_samples());

        let start = (
            vec![0.0; problem.num_regression_dims()],
            vec![0.0; problem.num_compressed_dims()],
        );
        let report = trainer
            .fit(&problem, &strategy, &mut state, start, 10, true)
            .unwrap();

        assert_eq!(Termination::Diverged, report.termination());
        assert!(!report.converged());
        assert!(report.solution().is_none());
        assert_eq!(0, report.iterations());
    }

    #[test]
    fn test_fixed_vertices_are_kept() {
        let problem = test_utils::regime_problem(2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let trainer = Trainer::new();
        let mut state = LatentState::new(problem.num_samples());
        state.fix(0, 1);
        state.fix(19, 0);

        let start = trainer.hotstart(&problem, &strategy, &mut state).unwrap();
        assert_eq!(1, state.latent()[0]);
        assert_eq!(0, state.latent()[19]);

        let report = trainer
            .fit(&problem, &strategy, &mut state, start, 6, true)
            .unwrap();
        let latent = report.solution().unwrap().latent();
        assert_eq!(1, latent[0]);
        assert_eq!(0, latent[19]);
    }

    #[test]
    fn test_start_dimension_mismatch() {
        let problem = test_utils::regime_problem(2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let trainer = Trainer::new();
        let mut state = LatentState::new(problem.num_samples());

        let start = (vec![0.0; 3], vec![0.0; problem.num_compressed_dims()]);
        let result = trainer.fit(&problem, &strategy, &mut state, start, 5, true);
        assert!(matches!(result, Err(TcrfrError::DimensionMismatch(_))));

        let start = (vec![0.0; problem.num_regression_dims()], vec![0.0; 1]);
        let result = trainer.fit(&problem, &strategy, &mut state, start, 5, true);
        assert!(matches!(result, Err(TcrfrError::DimensionMismatch(_))));
    }

    #[test]
    fn test_hotstart_latent_length_mismatch() {
        let problem = test_utils::regime_problem(2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let mut state = LatentState::new(3);

        match Trainer::new().hotstart(&problem, &strategy, &mut state) {
            Err(TcrfrError::DimensionMismatch(e)) => {
                assert_eq!(20, e.expected());
                assert_eq!(3, e.actual());
            }
            _ => panic!("expected a dimension mismatch"),
        }
        assert_eq!(&[0, 0, 0], state.latent());
    }

    #[test]
    fn test_fit_latent_length_mismatch() {
        let problem = test_utils::regime_problem(2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let mut state = LatentState::new(21);
        let start = (
            vec![0.0; problem.num_regression_dims()],
            vec![0.0; problem.num_compressed_dims()],
        );

        let result = Trainer::new().fit(&problem, &strategy, &mut state, start, 5, true);
        assert!(matches!(result, Err(TcrfrError::DimensionMismatch(_))));
    }

    #[test]
    fn test_no_iterations() {
        let problem = test_utils::regime_problem(2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let mut state = LatentState::new(problem.num_samples());
        let start = (
            vec![0.0; problem.num_regression_dims()],
            vec![0.0; problem.num_compressed_dims()],
        );

        let report = Trainer::new()
            .fit(&problem, &strategy, &mut state, start, 0, true)
            .unwrap();
        assert_eq!(Termination::Exhausted, report.termination());
        assert!(report.solution().is_none());
    }

    #[test]
    fn test_builder_validation() {
        assert!(Trainer::new().lbfgs_max_iter(0).is_err());
        assert!(Trainer::new().lbfgs_memory(0).is_err());
        assert!(Trainer::new().kmeans_restarts(0).is_err());
        assert!(Trainer::new().kmeans_max_iter(0).is_err());
        assert!(Trainer::new().kmeans_tol(-1.0).is_err());
        assert!(Trainer::new().n_threads(0).is_err());
        assert!(Trainer::new().n_threads(4).is_ok());
    }
}
