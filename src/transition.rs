use nalgebra::{DMatrix, DVector};

use crate::errors::{Result, TcrfrError};

/// Index maps between compact (symmetric) and full transition matrices.
#[derive(Clone, Debug)]
pub struct TransitionCodec {
    states: usize,
    // S x S -> 0..S*S
    full: Vec<usize>,
    // S x S -> 0..S(S+1)/2, symmetric under swap
    sym: Vec<usize>,
    // S*S x S(S+1)/2, one 1.0 per row
    expansion: DMatrix<f64>,
}

impl TransitionCodec {
    /// Builds the index maps for `states` latent states.
    pub fn new(states: usize) -> Self {
        let mut full = vec![0; states * states];
        for (cnt, idx) in full.iter_mut().enumerate() {
            *idx = cnt;
        }

        let mut sym = vec![0; states * states];
        let mut cnt = 0;
        for s1 in 0..states {
            for s2 in s1..states {
                sym[s1 * states + s2] = cnt;
                sym[s2 * states + s1] = cnt;
                cnt += 1;
            }
        }

        let mut expansion = DMatrix::zeros(states * states, cnt);
        for s1 in 0..states {
            for s2 in 0..states {
                expansion[(full[s1 * states + s2], sym[s1 * states + s2])] = 1.0;
            }
        }

        Self {
            states,
            full,
            sym,
            expansion,
        }
    }

    /// Returns the number of latent states.
    #[inline(always)]
    pub const fn states(&self) -> usize {
        self.states
    }

    /// Returns the number of values stored for a full transition matrix.
    #[inline(always)]
    pub const fn d_full(&self) -> usize {
        self.states * self.states
    }

    /// Returns the number of values stored for a symmetric transition matrix.
    #[inline(always)]
    pub const fn d_sym(&self) -> usize {
        self.states * (self.states + 1) / 2
    }

    /// Position of `(s1, s2)` in a full transition block.
    #[inline(always)]
    pub fn full_index(&self, s1: usize, s2: usize) -> usize {
        self.full[s1 * self.states + s2]
    }

    /// Position of the unordered pair `{s1, s2}` in a compact symmetric block.
    #[inline(always)]
    pub fn sym_index(&self, s1: usize, s2: usize) -> usize {
        self.sym[s1 * self.states + s2]
    }

    /// The 0/1 matrix `M` with `full = M * compact`.
    #[inline(always)]
    pub fn expansion(&self) -> &DMatrix<f64> {
        &self.expansion
    }

    fn expand_into(&self, compact: &[f64], full: &mut [f64]) {
        let expanded = &self.expansion * DVector::from_column_slice(compact);
        full.copy_from_slice(expanded.as_slice());
    }

    fn transpose_into(&self, full: &[f64], compact: &mut [f64]) {
        let collapsed = self.expansion.tr_mul(&DVector::from_column_slice(full));
        compact.copy_from_slice(collapsed.as_slice());
    }
}

/// Layout of the packed CRF parameter vector `v`.
///
/// `v` holds one block per transition type, compact when the type is
/// symmetric and full otherwise, followed by `states * n_feats` emission
/// weights. The unpacked vector holds a full `states * states` block per
/// type followed by the same emission weights.
#[derive(Clone, Debug)]
pub struct ParamLayout {
    codec: TransitionCodec,
    trans_sym: Vec<bool>,
    n_feats: usize,
    trans_total_dims: usize,
}

impl ParamLayout {
    /// Creates a layout with one symmetry flag per transition type.
    pub fn new(codec: TransitionCodec, trans_sym: Vec<bool>, n_feats: usize) -> Self {
        let trans_total_dims = trans_sym
            .iter()
            .map(|&sym| if sym { codec.d_sym() } else { codec.d_full() })
            .sum();
        Self {
            codec,
            trans_sym,
            n_feats,
            trans_total_dims,
        }
    }

    /// Returns the transition codec.
    #[inline(always)]
    pub fn codec(&self) -> &TransitionCodec {
        &self.codec
    }

    /// Returns the symmetry flag of each transition type.
    #[inline(always)]
    pub fn trans_sym(&self) -> &[bool] {
        &self.trans_sym
    }

    /// Returns the number of transition types.
    #[inline(always)]
    pub fn n_trans_types(&self) -> usize {
        self.trans_sym.len()
    }

    /// Returns the number of packed transition parameters.
    #[inline(always)]
    pub const fn trans_total_dims(&self) -> usize {
        self.trans_total_dims
    }

    /// Returns the number of emission weights.
    #[inline(always)]
    pub const fn emission_dims(&self) -> usize {
        self.codec.states * self.n_feats
    }

    /// Returns the length of the packed vector.
    #[inline(always)]
    pub const fn num_compressed_dims(&self) -> usize {
        self.trans_total_dims + self.emission_dims()
    }

    /// Returns the length of the unpacked vector.
    #[inline(always)]
    pub fn num_dims(&self) -> usize {
        self.emission_offset() + self.emission_dims()
    }

    /// Start of transition type `t` in the unpacked vector.
    #[inline(always)]
    pub const fn trans_offset(&self, t: usize) -> usize {
        t * self.codec.d_full()
    }

    /// Start of the emission weights in the unpacked vector.
    #[inline(always)]
    pub fn emission_offset(&self) -> usize {
        self.trans_offset(self.n_trans_types())
    }

    /// Expands a packed vector.
    ///
    /// # Errors
    ///
    /// `v` must have [`ParamLayout::num_compressed_dims`] entries.
    pub fn unpack(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.num_compressed_dims() {
            return Err(TcrfrError::dimension_mismatch(
                "packed parameter vector",
                self.num_compressed_dims(),
                v.len(),
            ));
        }
        let d_full = self.codec.d_full();
        let d_sym = self.codec.d_sym();
        let mut upv = vec![0.0; self.num_dims()];
        let mut cnt = 0;
        let mut cnt_full = 0;
        for &sym in &self.trans_sym {
            let dst = &mut upv[cnt_full..cnt_full + d_full];
            if sym {
                self.codec.expand_into(&v[cnt..cnt + d_sym], dst);
                cnt += d_sym;
            } else {
                dst.copy_from_slice(&v[cnt..cnt + d_full]);
                cnt += d_full;
            }
            cnt_full += d_full;
        }
        upv[cnt_full..].copy_from_slice(&v[cnt..]);
        Ok(upv)
    }

    /// Projects an unpacked vector back onto the packed layout.
    ///
    /// Symmetric blocks take the mean of mirrored cells, so
    /// `pack(unpack(v)) == v`.
    ///
    /// # Errors
    ///
    /// `full` must have [`ParamLayout::num_dims`] entries.
    pub fn pack(&self, full: &[f64]) -> Result<Vec<f64>> {
        let mut v = self.pull_back(full)?;
        let states = self.codec.states;
        let mut cnt = 0;
        for &sym in &self.trans_sym {
            if sym {
                for s1 in 0..states {
                    for s2 in s1 + 1..states {
                        v[cnt + self.codec.sym_index(s1, s2)] *= 0.5;
                    }
                }
                cnt += self.codec.d_sym();
            } else {
                cnt += self.codec.d_full();
            }
        }
        Ok(v)
    }

    /// Maps a gradient over the unpacked vector to the packed vector.
    ///
    /// This is the transpose of [`ParamLayout::unpack`]: mirrored cells of a
    /// symmetric block add up into their shared packed entry.
    ///
    /// # Errors
    ///
    /// `grad` must have [`ParamLayout::num_dims`] entries.
    pub fn pull_back(&self, grad: &[f64]) -> Result<Vec<f64>> {
        if grad.len() != self.num_dims() {
            return Err(TcrfrError::dimension_mismatch(
                "unpacked parameter vector",
                self.num_dims(),
                grad.len(),
            ));
        }
        let d_full = self.codec.d_full();
        let d_sym = self.codec.d_sym();
        let mut v = vec![0.0; self.num_compressed_dims()];
        let mut cnt = 0;
        let mut cnt_full = 0;
        for &sym in &self.trans_sym {
            let src = &grad[cnt_full..cnt_full + d_full];
            if sym {
                self.codec.transpose_into(src, &mut v[cnt..cnt + d_sym]);
                cnt += d_sym;
            } else {
                v[cnt..cnt + d_full].copy_from_slice(src);
                cnt += d_full;
            }
            cnt_full += d_full;
        }
        v[cnt..].copy_from_slice(&grad[cnt_full..]);
        Ok(v)
    }
}
