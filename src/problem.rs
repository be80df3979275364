use core::fmt;

use nalgebra::DMatrix;

use crate::errors::{Result, TcrfrError};
use crate::feature_map::{self, JointFeatures};
use crate::graph::{Connectivity, Graph};
use crate::regularizer::Regularizer;
use crate::transition::{ParamLayout, TransitionCodec};

/// Observations over the vertices of the graph.
#[derive(Clone, Debug)]
pub struct Dataset {
    data: DMatrix<f64>,
    labels: Vec<f64>,
    label_inds: Vec<usize>,
    unlabeled_inds: Vec<usize>,
}

impl Dataset {
    /// Creates a new dataset.
    ///
    /// # Arguments
    ///
    /// * `data` - Feature matrix, `feats x samples`; column `i` belongs to vertex `i`.
    /// * `labels` - Target value of each labeled vertex.
    /// * `label_inds` - Vertex of each label.
    /// * `unlabeled_inds` - Vertices without a label.
    ///
    /// # Errors
    ///
    /// The matrix must be non-empty and finite, every label needs exactly one
    /// index, indices must be in range and unique, and the two index sets
    /// must be disjoint.
    pub fn new(
        data: DMatrix<f64>,
        labels: Vec<f64>,
        label_inds: Vec<usize>,
        unlabeled_inds: Vec<usize>,
    ) -> Result<Self> {
        let (feats, samples) = data.shape();
        if feats == 0 || samples == 0 {
            return Err(TcrfrError::invalid_input(format!(
                "data must be a non-empty matrix, got {feats}x{samples}"
            )));
        }
        if data.iter().any(|x| !x.is_finite()) {
            return Err(TcrfrError::invalid_input("data contains non-finite values"));
        }
        if labels.len() != label_inds.len() {
            return Err(TcrfrError::invalid_input(format!(
                "{} labels given for {} labeled indices",
                labels.len(),
                label_inds.len()
            )));
        }
        if labels.iter().any(|y| !y.is_finite()) {
            return Err(TcrfrError::invalid_input("labels contain non-finite values"));
        }
        let mut seen = vec![false; samples];
        for &i in label_inds.iter().chain(&unlabeled_inds) {
            if i >= samples {
                return Err(TcrfrError::invalid_input(format!(
                    "index {i} is out of range for {samples} samples"
                )));
            }
            if seen[i] {
                return Err(TcrfrError::invalid_input(format!(
                    "index {i} is listed more than once"
                )));
            }
            seen[i] = true;
        }
        Ok(Self {
            data,
            labels,
            label_inds,
            unlabeled_inds,
        })
    }

    /// Creates a new dataset from feature rows.
    ///
    /// `rows[f][i]` is feature `f` of vertex `i`.
    ///
    /// # Errors
    ///
    /// The rows must have equal lengths; see also [`Dataset::new`].
    pub fn from_rows(
        rows: &[Vec<f64>],
        labels: Vec<f64>,
        label_inds: Vec<usize>,
        unlabeled_inds: Vec<usize>,
    ) -> Result<Self> {
        let samples = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != samples) {
            return Err(TcrfrError::invalid_input(
                "data is not a matrix: feature rows differ in length",
            ));
        }
        let data = DMatrix::from_fn(rows.len(), samples, |f, i| rows[f][i]);
        Self::new(data, labels, label_inds, unlabeled_inds)
    }

    /// Returns the feature matrix.
    #[inline(always)]
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Returns the labels.
    #[inline(always)]
    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// Returns the labeled vertices.
    #[inline(always)]
    pub fn label_inds(&self) -> &[usize] {
        &self.label_inds
    }

    /// Returns the unlabeled vertices.
    #[inline(always)]
    pub fn unlabeled_inds(&self) -> &[usize] {
        &self.unlabeled_inds
    }
}

/// Regularization settings.
#[derive(Clone, Debug)]
pub struct Hyperparameters {
    reg_theta: f64,
    reg_lambda: f64,
    reg_gamma: f64,
    trans_regs: Vec<f64>,
    trans_sym: Vec<bool>,
}

impl Hyperparameters {
    /// Creates the default settings.
    pub fn new() -> Self {
        Self {
            reg_theta: 0.5,
            reg_lambda: 0.001,
            reg_gamma: 1.0,
            trans_regs: vec![1.0],
            trans_sym: vec![true],
        }
    }

    /// Sets the trade-off between the CRF (0.0) and the regression (1.0).
    pub fn reg_theta(mut self, reg_theta: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&reg_theta) {
            return Err(TcrfrError::invalid_input("reg_theta must be in [0, 1]"));
        }
        self.reg_theta = reg_theta;
        Ok(self)
    }

    /// Sets the ridge regularizer of the regression weights.
    pub fn reg_lambda(mut self, reg_lambda: f64) -> Result<Self> {
        if !(reg_lambda > 0.0 && reg_lambda.is_finite()) {
            return Err(TcrfrError::invalid_input("reg_lambda must be greater than 0.0"));
        }
        self.reg_lambda = reg_lambda;
        Ok(self)
    }

    /// Sets the regularizer of the CRF weights.
    pub fn reg_gamma(mut self, reg_gamma: f64) -> Result<Self> {
        if !(reg_gamma > 0.0 && reg_gamma.is_finite()) {
            return Err(TcrfrError::invalid_input("reg_gamma must be greater than 0.0"));
        }
        self.reg_gamma = reg_gamma;
        Ok(self)
    }

    /// Sets the self-transition regularizer of each transition type.
    ///
    /// A single value applies to all types.
    pub fn trans_regs(mut self, trans_regs: Vec<f64>) -> Result<Self> {
        if trans_regs.is_empty() {
            return Err(TcrfrError::invalid_input("trans_regs must not be empty"));
        }
        if trans_regs.iter().any(|&r| !(r > 0.0 && r.is_finite())) {
            return Err(TcrfrError::invalid_input(
                "trans_regs must be greater than 0.0",
            ));
        }
        self.trans_regs = trans_regs;
        Ok(self)
    }

    /// Marks each transition type as symmetric or full.
    ///
    /// A single value applies to all types.
    pub fn trans_sym(mut self, trans_sym: Vec<bool>) -> Result<Self> {
        if trans_sym.is_empty() {
            return Err(TcrfrError::invalid_input("trans_sym must not be empty"));
        }
        self.trans_sym = trans_sym;
        Ok(self)
    }
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self::new()
    }
}

fn broadcast<T: Clone>(name: &str, values: &[T], n_types: usize) -> Result<Vec<T>> {
    if values.len() == 1 {
        Ok(vec![values[0].clone(); n_types])
    } else if values.len() == n_types {
        Ok(values.to_vec())
    } else {
        Err(TcrfrError::invalid_input(format!(
            "{name} has {} entries, expected 1 or {n_types}",
            values.len()
        )))
    }
}

/// The immutable structure of a TCRFR problem.
///
/// Holds the data, the graph, the parameter layout and the regularizers.
/// Built once; fitting never changes it.
#[derive(Clone, Debug)]
pub struct Problem {
    dataset: Dataset,
    graph: Graph,
    layout: ParamLayout,
    regularizer: Regularizer,
    reg_theta: f64,
    reg_lambda: f64,
    reg_gamma: f64,
    trans_regs: Vec<f64>,
}

impl Problem {
    /// Creates a new problem.
    ///
    /// # Errors
    ///
    /// The graph must have one vertex per sample, `states` must be in
    /// `1..=samples`, and `trans_regs`/`trans_sym` must have 1 or `T` entries.
    pub fn new(
        dataset: Dataset,
        connectivity: &Connectivity,
        states: usize,
        hyperparameters: Hyperparameters,
    ) -> Result<Self> {
        let (feats, samples) = dataset.data.shape();
        if connectivity.n_vertices() != samples {
            return Err(TcrfrError::invalid_input(format!(
                "graph has {} vertices but data has {samples} samples",
                connectivity.n_vertices()
            )));
        }
        if states == 0 || states > samples {
            return Err(TcrfrError::invalid_input(format!(
                "states must be in 1..={samples}, got {states}"
            )));
        }

        let graph = Graph::new(connectivity);
        let n_types = graph.n_trans_types();
        let trans_sym = broadcast("trans_sym", &hyperparameters.trans_sym, n_types)?;
        let trans_regs = broadcast("trans_regs", &hyperparameters.trans_regs, n_types)?;

        let layout = ParamLayout::new(TransitionCodec::new(states), trans_sym, feats);
        let regularizer = Regularizer::new(&layout, hyperparameters.reg_gamma, &trans_regs)?;

        let problem = Self {
            dataset,
            graph,
            layout,
            regularizer,
            reg_theta: hyperparameters.reg_theta,
            reg_lambda: hyperparameters.reg_lambda,
            reg_gamma: hyperparameters.reg_gamma,
            trans_regs,
        };
        log::info!("{problem}");
        Ok(problem)
    }

    /// Returns the dataset.
    #[inline(always)]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Returns the feature matrix.
    #[inline(always)]
    pub fn data(&self) -> &DMatrix<f64> {
        &self.dataset.data
    }

    /// Returns the graph.
    #[inline(always)]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Returns the parameter layout.
    #[inline(always)]
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Returns the CRF regularizer.
    #[inline(always)]
    pub fn regularizer(&self) -> &Regularizer {
        &self.regularizer
    }

    /// Returns the regression/CRF trade-off.
    #[inline(always)]
    pub const fn reg_theta(&self) -> f64 {
        self.reg_theta
    }

    /// Returns the ridge regularizer.
    #[inline(always)]
    pub const fn reg_lambda(&self) -> f64 {
        self.reg_lambda
    }

    /// Returns the CRF regularizer scale.
    #[inline(always)]
    pub const fn reg_gamma(&self) -> f64 {
        self.reg_gamma
    }

    /// Returns the self-transition regularizer of each transition type.
    #[inline(always)]
    pub fn trans_regs(&self) -> &[f64] {
        &self.trans_regs
    }

    /// Returns the number of latent states.
    #[inline(always)]
    pub fn num_states(&self) -> usize {
        self.layout.codec().states()
    }

    /// Returns the number of features.
    #[inline(always)]
    pub fn num_feats(&self) -> usize {
        self.dataset.data.nrows()
    }

    /// Returns the number of samples, i.e. vertices.
    #[inline(always)]
    pub fn num_samples(&self) -> usize {
        self.dataset.data.ncols()
    }

    /// Returns the number of labeled vertices.
    #[inline(always)]
    pub fn num_labeled(&self) -> usize {
        self.dataset.labels.len()
    }

    /// Returns the number of unlabeled vertices.
    #[inline(always)]
    pub fn num_unlabeled(&self) -> usize {
        self.dataset.unlabeled_inds.len()
    }

    /// Returns the number of transition types.
    #[inline(always)]
    pub fn num_trans_types(&self) -> usize {
        self.layout.n_trans_types()
    }

    /// Returns the number of packed transition parameters.
    #[inline(always)]
    pub const fn trans_total_dims(&self) -> usize {
        self.layout.trans_total_dims()
    }

    /// Returns the length of the unpacked CRF parameter vector.
    #[inline(always)]
    pub fn num_dims(&self) -> usize {
        self.layout.num_dims()
    }

    /// Returns the length of the packed CRF parameter vector.
    #[inline(always)]
    pub const fn num_compressed_dims(&self) -> usize {
        self.layout.num_compressed_dims()
    }

    /// Returns the length of the regression weight vector.
    #[inline(always)]
    pub fn num_regression_dims(&self) -> usize {
        self.num_states() * self.num_feats()
    }

    /// Expands a packed CRF parameter vector.
    pub fn unpack(&self, v: &[f64]) -> Result<Vec<f64>> {
        self.layout.unpack(v)
    }

    /// Projects an unpacked CRF parameter vector onto the packed layout.
    pub fn pack(&self, full: &[f64]) -> Result<Vec<f64>> {
        self.layout.pack(full)
    }

    /// Checks that a latent assignment covers every vertex with a valid state.
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong length or an out-of-range state.
    pub fn check_latent(&self, latent: &[usize]) -> Result<()> {
        if latent.len() != self.num_samples() {
            return Err(TcrfrError::dimension_mismatch(
                "latent assignment",
                self.num_samples(),
                latent.len(),
            ));
        }
        if let Some(&s) = latent.iter().find(|&&s| s >= self.num_states()) {
            return Err(TcrfrError::invalid_input(format!(
                "latent state {s} is out of range for {} states",
                self.num_states()
            )));
        }
        Ok(())
    }

    /// Computes the CRF sufficient statistics of a latent assignment.
    pub fn crf_joint_feature_map(&self, latent: &[usize]) -> Result<Vec<f64>> {
        self.check_latent(latent)?;
        Ok(feature_map::crf_joint_feature_map(
            &self.graph,
            &self.layout,
            self.data(),
            latent,
        ))
    }

    /// Computes the regression design of a latent assignment.
    pub fn regression_feature_map(&self, latent: &[usize]) -> Result<DMatrix<f64>> {
        self.check_latent(latent)?;
        Ok(feature_map::regression_feature_map(
            self.data(),
            self.num_states(),
            latent,
        ))
    }

    /// Computes both joint feature maps of a latent assignment.
    pub fn joint_feature_map(&self, latent: &[usize]) -> Result<JointFeatures> {
        self.check_latent(latent)?;
        Ok(JointFeatures {
            phis: feature_map::regression_feature_map(self.data(), self.num_states(), latent),
            psi: feature_map::crf_joint_feature_map(&self.graph, &self.layout, self.data(), latent),
        })
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "TCRFR properties:")?;
        writeln!(f, "- samples     : {}", self.num_samples())?;
        writeln!(f, "- labeled     : {}", self.num_labeled())?;
        writeln!(f, "- unlabeled   : {}", self.num_unlabeled())?;
        writeln!(f, "- features    : {}", self.num_feats())?;
        writeln!(
            f,
            "- CRF dims    : {} = {}+{}",
            self.num_compressed_dims(),
            self.trans_total_dims(),
            self.layout.emission_dims()
        )?;
        writeln!(f, "- lambda      : {}", self.reg_lambda)?;
        writeln!(f, "- gamma       : {}", self.reg_gamma)?;
        writeln!(f, "- theta       : {}", self.reg_theta)?;
        writeln!(f, "- trans regs  : {:?}", self.trans_regs)?;
        writeln!(f, "- edges       : {}", self.graph.edges().len())?;
        writeln!(f, "- states      : {}", self.num_states())?;
        writeln!(f, "- trans types : {}", self.num_trans_types())?;
        write!(f, "- trans sym   : {:?}", self.layout.trans_sym())
    }
}
