use nalgebra::DMatrix;

use crate::graph::Graph;
use crate::transition::ParamLayout;

/// Joint feature maps for a latent assignment.
#[derive(Clone, Debug)]
pub struct JointFeatures {
    /// Regression design, `(states * feats) x samples`.
    pub phis: DMatrix<f64>,

    /// CRF sufficient statistics over the unpacked parameters.
    pub psi: Vec<f64>,
}

/// Computes the CRF sufficient statistics.
///
/// Every edge of type `t` counts the cell `(latent[i], latent[j])` of the
/// `t`-th transition block, and every vertex adds its feature column to the
/// emission block of its state.
pub fn crf_joint_feature_map(
    graph: &Graph,
    layout: &ParamLayout,
    data: &DMatrix<f64>,
    latent: &[usize],
) -> Vec<f64> {
    let codec = layout.codec();
    let mut psi = vec![0.0; layout.num_dims()];

    // transitions
    for edge in graph.edges() {
        let yi = latent[edge.source()];
        let yj = latent[edge.target()];
        psi[layout.trans_offset(edge.trans_type()) + codec.full_index(yi, yj)] += 1.0;
    }

    // emissions
    let feats = data.nrows();
    let cnt = layout.emission_offset();
    for (v, column) in data.column_iter().enumerate() {
        let start = cnt + latent[v] * feats;
        for (p, x) in psi[start..start + feats].iter_mut().zip(column.iter()) {
            *p += x;
        }
    }
    psi
}

/// Computes the regression design conditioned on the latent assignment.
///
/// Column `v` holds the features of vertex `v` in the row block of its state
/// and zeros elsewhere.
pub fn regression_feature_map(
    data: &DMatrix<f64>,
    states: usize,
    latent: &[usize],
) -> DMatrix<f64> {
    let feats = data.nrows();
    let mut phis = DMatrix::zeros(states * feats, data.ncols());
    for (v, column) in data.column_iter().enumerate() {
        let start = latent[v] * feats;
        for (f, &x) in column.iter().enumerate() {
            phis[(start + f, v)] = x;
        }
    }
    phis
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::graph::Connectivity;
    use crate::transition::TransitionCodec;

    fn fixture() -> (Graph, ParamLayout, DMatrix<f64>) {
        // 0 -1- 1 -2- 2 -1- 3
        let mut connectivity = Connectivity::new(4);
        connectivity.add_edge(0, 1, 1).unwrap();
        connectivity.add_edge(1, 2, 2).unwrap();
        connectivity.add_edge(2, 3, 1).unwrap();
        let graph = Graph::new(&connectivity);
        let layout = ParamLayout::new(TransitionCodec::new(2), vec![true, false], 2);
        let data = DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 3.0, 4.0, -1.0, -2.0, -3.0, -4.0]);
        (graph, layout, data)
    }

    #[test]
    fn test_crf_joint_feature_map() {
        let (graph, layout, data) = fixture();
        let latent = [0, 1, 1, 0];

        let psi = crf_joint_feature_map(&graph, &layout, &data, &latent);

        let mut expected = vec![0.0; 12];
        // type 0: (0,1) and (1,0)
        expected[1] = 1.0;
        expected[2] = 1.0;
        // type 1: (1,1)
        expected[4 + 3] = 1.0;
        // state 0: vertices 0, 3
        expected[8] = 5.0;
        expected[9] = -5.0;
        // state 1: vertices 1, 2
        expected[10] = 5.0;
        expected[11] = -5.0;
        assert_eq!(expected, psi);
    }

    #[test]
    fn test_transition_counts_match_edges() {
        let (graph, layout, data) = fixture();
        let counts = graph.edges_per_type();
        for latent in [[0, 0, 0, 0], [1, 0, 1, 0], [1, 1, 0, 1]] {
            let psi = crf_joint_feature_map(&graph, &layout, &data, &latent);
            for (t, &count) in counts.iter().enumerate() {
                let offset = layout.trans_offset(t);
                let total: f64 = psi[offset..offset + 4].iter().sum();
                assert_eq!(count as f64, total);
            }
        }
    }

    #[test]
    fn test_regression_feature_map() {
        let (_, _, data) = fixture();
        let latent = [1, 0, 0, 1];

        let phis = regression_feature_map(&data, 2, &latent);

        assert_eq!((4, 4), phis.shape());
        assert_eq!(0.0, phis[(0, 0)]);
        assert_eq!(1.0, phis[(2, 0)]);
        assert_eq!(-1.0, phis[(3, 0)]);
        assert_eq!(2.0, phis[(0, 1)]);
        assert_eq!(0.0, phis[(2, 1)]);

        // summing the state blocks restores the data
        for v in 0..4 {
            for f in 0..2 {
                let total = phis[(f, v)] + phis[(2 + f, v)];
                assert_eq!(data[(f, v)], total);
            }
        }
    }
}
