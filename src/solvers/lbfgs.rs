use argmin::{
    core::{observers::ObserverMode, CostFunction, Executor, Gradient},
    solver::{linesearch::MoreThuenteLineSearch, quasinewton::LBFGS},
};
use argmin_math::{ArgminAdd, ArgminDot, ArgminSub};
use argmin_observer_slog::SlogLogger;

use crate::errors::{Result, TcrfrError};
use crate::inference::LatentInference;
use crate::problem::Problem;

/// CRF objective over the packed parameters:
/// `f(v) = w' Q w / 2 - w' psi + log Z(w)` with `w = unpack(v)`.
struct CrfLoss<'a, I> {
    problem: &'a Problem,
    strategy: &'a I,
    psi: &'a Vec<f64>,
    use_grads: bool,
}

impl<'a, I> CrfLoss<'a, I>
where
    I: LatentInference,
{
    fn new(problem: &'a Problem, strategy: &'a I, psi: &'a Vec<f64>, use_grads: bool) -> Self {
        Self {
            problem,
            strategy,
            psi,
            use_grads,
        }
    }

    fn objective(&self, v: &[f64]) -> Result<f64> {
        let vn = self.problem.unpack(v)?;
        let linear: f64 = vn.dot(self.psi);
        Ok(self.problem.regularizer().quadratic(&vn) - linear
            + self.strategy.log_partition(self.problem, &vn))
    }

    fn analytic_gradient(&self, v: &[f64]) -> Result<Option<Vec<f64>>> {
        let vn = self.problem.unpack(v)?;
        let Some(grad_log_part) = self.strategy.log_partition_derivative(self.problem, &vn) else {
            return Ok(None);
        };
        if grad_log_part.len() != vn.len() {
            return Err(TcrfrError::dimension_mismatch(
                "log-partition derivative",
                vn.len(),
                grad_log_part.len(),
            ));
        }
        let grad = self
            .problem
            .regularizer()
            .apply(&vn)
            .sub(self.psi)
            .add(&grad_log_part);
        self.problem.layout().pull_back(&grad).map(Some)
    }

    // forward differences, as L-BFGS-B does without a Jacobian
    fn numerical_gradient(&self, v: &[f64]) -> Result<Vec<f64>> {
        let f0 = self.objective(v)?;
        let mut x = v.to_vec();
        let mut grad = vec![0.0; v.len()];
        for i in 0..v.len() {
            let h = f64::EPSILON.sqrt() * v[i].abs().max(1.0);
            x[i] = v[i] + h;
            grad[i] = (self.objective(&x)? - f0) / h;
            x[i] = v[i];
        }
        Ok(grad)
    }
}

impl<'a, I> CostFunction for CrfLoss<'a, I>
where
    I: LatentInference,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.objective(param)?)
    }
}

impl<'a, I> Gradient for CrfLoss<'a, I>
where
    I: LatentInference,
{
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        if self.use_grads {
            if let Some(grad) = self.analytic_gradient(param)? {
                return Ok(grad);
            }
        }
        Ok(self.numerical_gradient(param)?)
    }
}

/// Minimizes the CRF objective for the sufficient statistics `psi`, starting
/// from the packed vector `v_init`.
///
/// Returns the objective value and the packed minimizer. A non-finite
/// objective at `v_init` is returned as is, together with `v_init`. If the
/// solver breaks down or ends above its starting point, the starting point is
/// kept.
#[allow(clippy::too_many_arguments)]
pub fn estimate_crf_weights<I>(
    problem: &Problem,
    strategy: &I,
    v_init: &[f64],
    psi: &[f64],
    use_grads: bool,
    max_iter: u64,
    memory: usize,
    verbose: bool,
) -> Result<(f64, Vec<f64>)>
where
    I: LatentInference,
{
    if psi.len() != problem.num_dims() {
        return Err(TcrfrError::dimension_mismatch(
            "sufficient statistics",
            problem.num_dims(),
            psi.len(),
        ));
    }
    let psi = psi.to_vec();
    let loss_function = CrfLoss::new(problem, strategy, &psi, use_grads);
    let start_cost = loss_function.objective(v_init)?;
    if !start_cost.is_finite() {
        log::warn!("CRF objective is not finite at the starting point: {start_cost}");
        return Ok((start_cost, v_init.to_vec()));
    }

    let linesearch = MoreThuenteLineSearch::new()
        .with_c(1e-4, 0.9)
        .map_err(|e| TcrfrError::solver(e.to_string()))?;
    let solver = LBFGS::new(linesearch, memory);
    let executor = Executor::new(loss_function, solver)
        .configure(|state| state.param(v_init.to_vec()).max_iters(max_iter));
    let executor = if verbose {
        executor.add_observer(SlogLogger::term(), ObserverMode::Always)
    } else {
        executor
    };

    let v = match executor.run() {
        Ok(res) => match res.state.param {
            Some(v) => v,
            None => return Ok((start_cost, v_init.to_vec())),
        },
        Err(e) => {
            log::warn!("L-BFGS stopped, keeping the starting point: {e}");
            return Ok((start_cost, v_init.to_vec()));
        }
    };

    let cost = CrfLoss::new(problem, strategy, &psi, use_grads).objective(&v)?;
    if cost.is_finite() && cost <= start_cost {
        Ok((cost, v))
    } else {
        Ok((start_cost, v_init.to_vec()))
    }
}
