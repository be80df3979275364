use crate::errors::{Result, TcrfrError};
use crate::transition::ParamLayout;

/// Diagonal CRF regularization matrix `Q` over the unpacked parameters.
///
/// Every transition cell and every emission weight is scaled by `reg_gamma`,
/// except self-transition cells `(s, s)` of type `t`, which are scaled by
/// `reg_gamma * trans_regs[t]`.
#[derive(Clone, Debug)]
pub struct Regularizer {
    diag: Vec<f64>,
}

impl Regularizer {
    /// Builds the diagonal for the given layout.
    ///
    /// # Errors
    ///
    /// `trans_regs` must have one entry per transition type.
    pub fn new(layout: &ParamLayout, reg_gamma: f64, trans_regs: &[f64]) -> Result<Self> {
        if trans_regs.len() != layout.n_trans_types() {
            return Err(TcrfrError::dimension_mismatch(
                "trans_regs",
                layout.n_trans_types(),
                trans_regs.len(),
            ));
        }
        let codec = layout.codec();
        let mut diag = vec![reg_gamma; layout.num_dims()];
        for (t, &trans_reg) in trans_regs.iter().enumerate() {
            let offset = layout.trans_offset(t);
            for s in 0..codec.states() {
                diag[offset + codec.full_index(s, s)] = reg_gamma * trans_reg;
            }
        }
        Ok(Self { diag })
    }

    /// Returns the diagonal of `Q`.
    #[inline(always)]
    pub fn diag(&self) -> &[f64] {
        &self.diag
    }

    /// Returns `Q * v`.
    pub fn apply(&self, v: &[f64]) -> Vec<f64> {
        self.diag.iter().zip(v).map(|(q, x)| q * x).collect()
    }

    /// Returns `v' Q v / 2`.
    pub fn quadratic(&self, v: &[f64]) -> f64 {
        self.diag.iter().zip(v).map(|(q, x)| q * x * x).sum::<f64>() * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transition::TransitionCodec;

    #[test]
    fn test_structure() {
        let layout = ParamLayout::new(TransitionCodec::new(3), vec![true, false], 2);
        let reg = Regularizer::new(&layout, 2.0, &[10.0, 0.5]).unwrap();
        let diag = reg.diag();

        assert_eq!(layout.num_dims(), diag.len());
        assert!(diag.iter().all(|&q| q > 0.0));
        for t in 0..2 {
            let offset = layout.trans_offset(t);
            for s1 in 0..3 {
                for s2 in 0..3 {
                    let q = diag[offset + layout.codec().full_index(s1, s2)];
                    if s1 == s2 {
                        assert_eq!(2.0 * [10.0, 0.5][t], q);
                    } else {
                        assert_eq!(2.0, q);
                    }
                }
            }
        }
        for &q in &diag[layout.emission_offset()..] {
            assert_eq!(2.0, q);
        }
    }

    #[test]
    fn test_quadratic() {
        let layout = ParamLayout::new(TransitionCodec::new(2), vec![false], 1);
        let reg = Regularizer::new(&layout, 1.0, &[3.0]).unwrap();
        let v = vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0];

        // self transitions 0 and 3 weigh 3, the rest 1
        let expected = 0.5 * (3.0 + 1.0 + 1.0 + 3.0 + 4.0 + 4.0);
        assert!((expected - reg.quadratic(&v)).abs() < f64::EPSILON);
        assert_eq!(vec![3.0, 1.0, 1.0, 3.0, 2.0, 2.0], reg.apply(&v));
    }

    #[test]
    fn test_trans_regs_length() {
        let layout = ParamLayout::new(TransitionCodec::new(2), vec![true, true], 1);
        assert!(Regularizer::new(&layout, 1.0, &[1.0]).is_err());
    }
}
