use core::cell::Cell;

use nalgebra::DMatrix;

use crate::errors::Result;
use crate::feature_map::JointFeatures;
use crate::graph::Connectivity;
use crate::inference::{LatentInference, LatentState};
use crate::math;
use crate::problem::{Dataset, Hyperparameters, Problem};

fn chain(n: usize) -> Connectivity {
    let mut connectivity = Connectivity::new(n);
    for i in 1..n {
        connectivity.add_edge(i - 1, i, 1).unwrap();
    }
    connectivity
}

/// Single feature `i` per vertex; even vertices are labeled with `2 i`.
pub fn ramp_dataset(n: usize, label_inds: &[usize], unlabeled_inds: &[usize]) -> Dataset {
    let data = DMatrix::from_fn(1, n, |_, i| i as f64);
    let labels = label_inds.iter().map(|&i| 2.0 * i as f64).collect();
    Dataset::new(data, labels, label_inds.to_vec(), unlabeled_inds.to_vec()).unwrap()
}

/// 0 -1- 1 -2- 2 -1- 3
pub fn two_type_connectivity() -> Connectivity {
    let mut connectivity = Connectivity::new(4);
    connectivity.add_edge(0, 1, 1).unwrap();
    connectivity.add_edge(1, 2, 2).unwrap();
    connectivity.add_edge(2, 3, 1).unwrap();
    connectivity
}

/// Path of `n` vertices with a single transition type. Vertex `i` has
/// feature `i`; even vertices are labeled.
pub fn path_problem(n: usize, states: usize, hyperparameters: Hyperparameters) -> Problem {
    let label_inds: Vec<usize> = (0..n).step_by(2).collect();
    let unlabeled_inds: Vec<usize> = (1..n).step_by(2).collect();
    let dataset = ramp_dataset(n, &label_inds, &unlabeled_inds);
    Problem::new(dataset, &chain(n), states, hyperparameters).unwrap()
}

/// Chain of 20 vertices whose targets follow `2x + 1` on the first half and
/// `-3x + 8` on the second half. Features are `x` and a bias; even vertices
/// are labeled.
pub fn regime_problem(states: usize, hyperparameters: Hyperparameters) -> Problem {
    let n = 20;
    let xs: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
    let data = DMatrix::from_fn(2, n, |f, i| if f == 0 { xs[i] } else { 1.0 });
    let label_inds: Vec<usize> = (0..n).step_by(2).collect();
    let unlabeled_inds: Vec<usize> = (1..n).step_by(2).collect();
    let labels = label_inds
        .iter()
        .map(|&i| {
            if i < n / 2 {
                2.0 * xs[i] + 1.0
            } else {
                -3.0 * xs[i] + 8.0
            }
        })
        .collect();
    let dataset = Dataset::new(data, labels, label_inds, unlabeled_inds).unwrap();
    Problem::new(dataset, &chain(n), states, hyperparameters).unwrap()
}

fn logsumexp(xs: &[f64]) -> f64 {
    xs.iter().fold(f64::NEG_INFINITY, |acc, &x| math::logsumexp(acc, x))
}

fn softmax(xs: &[f64]) -> Vec<f64> {
    let z = logsumexp(xs);
    xs.iter().map(|x| (x - z).exp()).collect()
}

/// Inference treating every edge and every vertex as an independent factor.
///
/// The log-partition is exact for that factorization and has an exact
/// derivative. MAP inference is a single ICM sweep that also scores labeled
/// vertices by their regression residual.
pub struct IndependentInference {
    poisoned: Cell<bool>,
}

impl IndependentInference {
    pub fn new() -> Self {
        Self {
            poisoned: Cell::new(false),
        }
    }

    /// Makes every following log-partition NaN.
    pub fn poison(&self) {
        self.poisoned.set(true);
    }

    fn emission_scores(problem: &Problem, v: &[f64], vertex: usize) -> Vec<f64> {
        let feats = problem.num_feats();
        let offset = problem.layout().emission_offset();
        let column = problem.data().column(vertex);
        (0..problem.num_states())
            .map(|s| {
                let start = offset + s * feats;
                math::dot(&v[start..start + feats], column.iter())
            })
            .collect()
    }
}

impl LatentInference for IndependentInference {
    fn map_inference(
        &self,
        problem: &Problem,
        u: &[f64],
        v: &[f64],
        state: &mut LatentState,
    ) -> Result<JointFeatures> {
        let layout = problem.layout();
        let codec = layout.codec();
        let feats = problem.num_feats();
        let dataset = problem.dataset();

        let mut targets = vec![None; problem.num_samples()];
        for (&i, &y) in dataset.label_inds().iter().zip(dataset.labels()) {
            targets[i] = Some(y);
        }

        for vertex in 0..problem.num_samples() {
            if state.is_fixed(vertex) {
                continue;
            }
            let mut scores = Self::emission_scores(problem, v, vertex);
            for edge in problem.graph().edges() {
                let offset = layout.trans_offset(edge.trans_type());
                for (s, score) in scores.iter_mut().enumerate() {
                    if edge.source() == vertex {
                        *score += v[offset + codec.full_index(s, state.latent()[edge.target()])];
                    } else if edge.target() == vertex {
                        *score += v[offset + codec.full_index(state.latent()[edge.source()], s)];
                    }
                }
            }
            if let Some(y) = targets[vertex] {
                let column = problem.data().column(vertex);
                for (s, score) in scores.iter_mut().enumerate() {
                    let residual = y - math::dot(&u[s * feats..(s + 1) * feats], column.iter());
                    *score -= 0.5 * residual * residual;
                }
            }
            let mut best = 0;
            for (s, &score) in scores.iter().enumerate() {
                if score > scores[best] {
                    best = s;
                }
            }
            state.assign(vertex, best);
        }
        problem.joint_feature_map(state.latent())
    }

    fn log_partition(&self, problem: &Problem, v: &[f64]) -> f64 {
        if self.poisoned.get() {
            return f64::NAN;
        }
        let layout = problem.layout();
        let d_full = layout.codec().d_full();
        let mut total = 0.0;
        for edge in problem.graph().edges() {
            let start = layout.trans_offset(edge.trans_type());
            total += logsumexp(&v[start..start + d_full]);
        }
        for vertex in 0..problem.num_samples() {
            total += logsumexp(&Self::emission_scores(problem, v, vertex));
        }
        total
    }

    fn log_partition_derivative(&self, problem: &Problem, v: &[f64]) -> Option<Vec<f64>> {
        let layout = problem.layout();
        let d_full = layout.codec().d_full();
        let feats = problem.num_feats();
        let mut grad = vec![0.0; v.len()];
        for edge in problem.graph().edges() {
            let start = layout.trans_offset(edge.trans_type());
            for (g, p) in grad[start..start + d_full]
                .iter_mut()
                .zip(softmax(&v[start..start + d_full]))
            {
                *g += p;
            }
        }
        let offset = layout.emission_offset();
        for vertex in 0..problem.num_samples() {
            let probs = softmax(&Self::emission_scores(problem, v, vertex));
            let column = problem.data().column(vertex);
            for (s, p) in probs.into_iter().enumerate() {
                let start = offset + s * feats;
                for (g, x) in grad[start..start + feats].iter_mut().zip(column.iter()) {
                    *g += p * x;
                }
            }
        }
        Some(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_inference_respects_fixed() {
        let problem = path_problem(5, 2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let mut state = LatentState::new(5);
        state.fix(2, 1);

        // state 1 explains every label; ties go to state 0
        let u = vec![0.0, 2.0];
        let v = vec![0.0; problem.num_dims()];
        let feats = strategy.map_inference(&problem, &u, &v, &mut state).unwrap();

        assert_eq!(&[0, 0, 1, 0, 1], state.latent());
        assert_eq!(problem.num_dims(), feats.psi.len());
        assert_eq!((2, 5), feats.phis.shape());
    }

    #[test]
    fn test_log_partition_at_zero() {
        let problem = path_problem(5, 2, Hyperparameters::new());
        let strategy = IndependentInference::new();
        let v = vec![0.0; problem.num_dims()];

        // 4 edges over 4 cells, 5 vertices over 2 states
        let expected = 4.0 * 4f64.ln() + 5.0 * 2f64.ln();
        assert!((expected - strategy.log_partition(&problem, &v)).abs() < 1e-12);

        strategy.poison();
        assert!(strategy.log_partition(&problem, &v).is_nan());
    }
}
