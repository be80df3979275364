//! # tcrfr
//!
//! Transductive Conditional Random Field Regression (TCRFR) implemented in
//! pure Rust.
//!
//! Every vertex of a graph carries a feature vector and a hidden discrete
//! state. A CRF over the graph scores state assignments, and each state owns
//! its own linear regressor. Fitting alternates latent inference, a CRF
//! weight update and a ridge regression on the labeled vertices.
//!
//! The latent inference is supplied by the caller through
//! [`LatentInference`].
#![cfg_attr(
    feature = "train",
    doc = "
## Examples

```rust
use tcrfr::errors::Result;
use tcrfr::{
    Connectivity, Dataset, Hyperparameters, JointFeatures, LatentInference, LatentState,
    Problem, Tcrfr,
};

// Keeps the current states and uses a flat log-partition.
struct KeepStates;

impl LatentInference for KeepStates {
    fn map_inference(
        &self,
        problem: &Problem,
        _u: &[f64],
        _v: &[f64],
        state: &mut LatentState,
    ) -> Result<JointFeatures> {
        problem.joint_feature_map(state.latent())
    }

    fn log_partition(&self, _problem: &Problem, _v: &[f64]) -> f64 {
        0.0
    }
}

// 0 - 1 - 2 - 3 - 4 - 5
let mut connectivity = Connectivity::new(6);
for i in 1..6 {
    connectivity.add_edge(i - 1, i, 1).unwrap();
}

let rows = vec![
    vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
    vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
];
let dataset = Dataset::from_rows(&rows, vec![1.0, 5.0, 9.0], vec![0, 2, 4], vec![1, 3, 5]).unwrap();
let problem = Problem::new(dataset, &connectivity, 2, Hyperparameters::new()).unwrap();

let mut model = Tcrfr::new(problem, KeepStates);
model.fit(10, None, false).unwrap();

let (predictions, latent) = model.predict(None).unwrap();
assert_eq!(6, predictions.len());
assert_eq!(6, latent.len());
```
"
)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod errors;

mod feature_map;
mod graph;
mod inference;
mod math;
mod model;
mod problem;
mod regularizer;
mod tcrfr;
mod transition;

#[cfg(feature = "train")]
mod kmeans;
#[cfg(feature = "train")]
mod solvers;
#[cfg(feature = "train")]
mod trainer;

#[cfg(test)]
mod test_utils;

pub use errors::{Result, TcrfrError};
pub use feature_map::JointFeatures;
pub use graph::{Connectivity, Graph, GraphEdge};
pub use inference::{LatentInference, LatentState};
pub use model::Solution;
pub use problem::{Dataset, Hyperparameters, Problem};
pub use regularizer::Regularizer;
pub use tcrfr::Tcrfr;
pub use transition::{ParamLayout, TransitionCodec};

#[cfg(feature = "train")]
pub use trainer::{FitReport, Termination, Trainer, CONVERGENCE_TOL};
