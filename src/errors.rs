//! Definition of errors.

use core::fmt;

use std::error::Error;

/// Error used when the data, the graph, or a hyperparameter is invalid.
#[derive(Debug)]
pub struct InvalidInputError {
    msg: String,
}

impl fmt::Display for InvalidInputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidInputError: {}", self.msg)
    }
}

impl Error for InvalidInputError {}

/// Error used when a vector does not have the length its layout requires.
#[derive(Debug)]
pub struct DimensionMismatchError {
    what: &'static str,
    expected: usize,
    actual: usize,
}

impl DimensionMismatchError {
    /// Expected length.
    pub const fn expected(&self) -> usize {
        self.expected
    }

    /// Actual length.
    pub const fn actual(&self) -> usize {
        self.actual
    }
}

impl fmt::Display for DimensionMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "DimensionMismatchError: {} has length {}, expected {}",
            self.what, self.actual, self.expected
        )
    }
}

impl Error for DimensionMismatchError {}

/// Error used when a numerical solve or an inference strategy fails.
#[derive(Debug)]
pub struct SolverError {
    msg: String,
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SolverError: {}", self.msg)
    }
}

impl Error for SolverError {}

/// The error type for Tcrfr.
#[derive(Debug)]
pub enum TcrfrError {
    /// Malformed data, labels, index sets or hyperparameters.
    InvalidInput(InvalidInputError),

    /// Malformed connectivity matrix.
    InvalidGraph(InvalidInputError),

    /// A vector of the wrong length.
    DimensionMismatch(DimensionMismatchError),

    /// Prediction was requested before a solution exists.
    NotFitted,

    /// A numerical solve or the inference strategy failed.
    Solver(SolverError),
}

impl TcrfrError {
    /// Creates a new [`InvalidInputError`].
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(InvalidInputError { msg: msg.into() })
    }

    /// Creates a new [`InvalidInputError`] describing the graph.
    pub fn invalid_graph<S: Into<String>>(msg: S) -> Self {
        Self::InvalidGraph(InvalidInputError { msg: msg.into() })
    }

    /// Creates a new [`DimensionMismatchError`].
    pub const fn dimension_mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch(DimensionMismatchError {
            what,
            expected,
            actual,
        })
    }

    /// Creates a new [`SolverError`].
    pub fn solver<S: Into<String>>(msg: S) -> Self {
        Self::Solver(SolverError { msg: msg.into() })
    }
}

impl fmt::Display for TcrfrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidInput(e) => e.fmt(f),
            Self::InvalidGraph(e) => write!(f, "InvalidGraphError: {}", e.msg),
            Self::DimensionMismatch(e) => e.fmt(f),
            Self::NotFitted => write!(f, "NotFittedError: the model has no solution yet"),
            Self::Solver(e) => e.fmt(f),
        }
    }
}

impl Error for TcrfrError {}

/// A specialized Result type.
pub type Result<T, E = TcrfrError> = core::result::Result<T, E>;
