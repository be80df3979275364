//! Numerical estimation of the CRF and regression weights.

pub mod lbfgs;
pub mod ridge;
