use std::thread;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::errors::{Result, TcrfrError};
use crate::math;

/// Result of a k-means run.
#[derive(Clone, Debug)]
pub struct Clustering {
    labels: Vec<usize>,
    inertia: f64,
}

impl Clustering {
    /// Cluster of each point.
    #[inline(always)]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Sum of squared distances of the points to their centroids.
    #[inline(always)]
    pub const fn inertia(&self) -> f64 {
        self.inertia
    }
}

/// Lloyd's k-means with random restarts over the columns of a matrix.
pub struct KMeans {
    n_clusters: usize,
    n_restarts: usize,
    max_iter: usize,
    tol: f64,
    seed: u64,
    n_threads: usize,
}

impl KMeans {
    pub fn new(
        n_clusters: usize,
        n_restarts: usize,
        max_iter: usize,
        tol: f64,
        seed: u64,
        n_threads: usize,
    ) -> Self {
        Self {
            n_clusters,
            n_restarts,
            max_iter,
            tol,
            seed,
            n_threads,
        }
    }

    /// Clusters the columns of `data` and returns the restart with the
    /// lowest inertia.
    ///
    /// Restart `r` draws its initial centroids from a generator seeded with
    /// `seed + r`, so the result does not depend on the number of threads.
    pub fn fit(&self, data: &DMatrix<f64>) -> Result<Clustering> {
        if self.n_clusters == 0 || self.n_clusters > data.ncols() {
            return Err(TcrfrError::invalid_input(format!(
                "cannot form {} clusters from {} points",
                self.n_clusters,
                data.ncols()
            )));
        }
        let tol = self.tol * mean_variance(data);

        let (s, r) = crossbeam_channel::unbounded();
        for restart in 0..self.n_restarts {
            s.send(restart).unwrap();
        }
        let best = thread::scope(|scope| {
            let mut threads = vec![];
            for _ in 0..self.n_threads {
                let t = scope.spawn(|| {
                    let mut best: Option<(usize, Clustering)> = None;
                    while let Ok(restart) = r.try_recv() {
                        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(restart as u64));
                        let clustering = lloyd(data, self.n_clusters, self.max_iter, tol, &mut rng);
                        best = pick(best, (restart, clustering));
                    }
                    best
                });
                threads.push(t);
            }
            let mut best = None;
            for t in threads {
                if let Some(candidate) = t.join().unwrap() {
                    best = pick(best, candidate);
                }
            }
            best
        });
        best.map(|(_, clustering)| clustering)
            .ok_or_else(|| TcrfrError::solver("k-means ran no restart"))
    }
}

fn pick(
    best: Option<(usize, Clustering)>,
    candidate: (usize, Clustering),
) -> Option<(usize, Clustering)> {
    match best {
        Some(best)
            if best
                .1
                .inertia
                .total_cmp(&candidate.1.inertia)
                .then(best.0.cmp(&candidate.0))
                .is_lt() =>
        {
            Some(best)
        }
        _ => Some(candidate),
    }
}

fn mean_variance(data: &DMatrix<f64>) -> f64 {
    let n = data.ncols() as f64;
    let mut total = 0.0;
    for row in data.row_iter() {
        let mean = row.sum() / n;
        total += row.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
    }
    total / data.nrows() as f64
}

fn nearest(centroids: &[Vec<f64>], point: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let dist = math::squared_distance(point, centroid);
        if dist < best.1 {
            best = (c, dist);
        }
    }
    best
}

fn lloyd(
    data: &DMatrix<f64>,
    k: usize,
    max_iter: usize,
    tol: f64,
    rng: &mut StdRng,
) -> Clustering {
    let feats = data.nrows();
    let points: Vec<Vec<f64>> = data
        .column_iter()
        .map(|c| c.iter().copied().collect())
        .collect();
    let mut centroids: Vec<Vec<f64>> = rand::seq::index::sample(rng, points.len(), k)
        .iter()
        .map(|i| points[i].clone())
        .collect();

    let mut labels = vec![0; points.len()];
    for _ in 0..max_iter {
        for (label, point) in labels.iter_mut().zip(&points) {
            *label = nearest(&centroids, point).0;
        }

        let mut sums = vec![vec![0.0; feats]; k];
        let mut counts = vec![0usize; k];
        for (&label, point) in labels.iter().zip(&points) {
            for (s, x) in sums[label].iter_mut().zip(point) {
                *s += x;
            }
            counts[label] += 1;
        }

        let mut shift = 0.0;
        for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
            // an empty cluster keeps its centroid
            if count == 0 {
                continue;
            }
            let updated: Vec<f64> = sum.into_iter().map(|s| s / count as f64).collect();
            shift += math::squared_distance(centroid, &updated);
            *centroid = updated;
        }
        if shift <= tol {
            break;
        }
    }

    let mut inertia = 0.0;
    for (label, point) in labels.iter_mut().zip(&points) {
        let (c, dist) = nearest(&centroids, point);
        *label = c;
        inertia += dist;
    }
    Clustering { labels, inertia }
}
