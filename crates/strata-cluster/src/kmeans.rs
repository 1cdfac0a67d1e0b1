//! Seeded mini-batch k-means.
//!
//! # Algorithm
//!
//! 1. Pick `k` initial centres with k-means++ seeding (D² sampling) on a
//!    random subset of the data.
//! 2. Repeatedly draw a mini-batch, assign each point to its nearest centre
//!    and move that centre towards the point with a per-centre learning rate
//!    of `1 / count`.
//! 3. Stop when the largest squared centre shift of a step is within
//!    `tolerance`, or after `max_iter` steps.
//! 4. Label the full data set and score the run by inertia (sum of squared
//!    distances). Of `n_init` runs the lowest inertia wins.
//!
//! All randomness comes from one `StdRng` seeded with `seed`, so a fit is a
//! pure function of its inputs. The assignment passes run on rayon; their
//! results are collected in input order before any reduction.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::errors::{ClusterError, Result};
use crate::vector::{nearest, squared_distance};

/// Parameters of one k-means fit.
#[derive(Clone, Debug, PartialEq)]
pub struct KMeansParams {
    /// Number of centres.
    pub k: usize,
    /// Independent seeded initializations; the lowest-inertia one is kept.
    pub n_init: usize,
    /// Upper bound on mini-batch steps per initialization.
    pub max_iter: usize,
    /// Points sampled per step.
    pub batch_size: usize,
    /// Convergence threshold on the largest squared centre shift of a step.
    pub tolerance: f64,
    /// RNG seed.
    pub seed: u64,
}

impl KMeansParams {
    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ClusterError::Configuration("k must be > 0".into()));
        }
        if self.n_init == 0 {
            return Err(ClusterError::Configuration("n_init must be > 0".into()));
        }
        if self.max_iter == 0 {
            return Err(ClusterError::Configuration("max_iter must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(ClusterError::Configuration("batch_size must be > 0".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ClusterError::Configuration(
                "tolerance must be a finite non-negative number".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a k-means fit.
#[derive(Clone, Debug, PartialEq)]
pub struct KMeansFit {
    /// Learned centres, `k` of them.
    pub centroids: Vec<Vec<f32>>,
    /// Centre index of each input point, in input order.
    pub labels: Vec<usize>,
    /// Sum of squared distances from each point to its centre.
    pub inertia: f64,
    /// Mini-batch steps taken by the winning initialization.
    pub iterations: usize,
    /// Whether the winning initialization met the tolerance.
    pub converged: bool,
}

impl KMeansFit {
    /// Number of points labelled with each centre.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }
}

/// Fit `params.k` centres to `data`.
///
/// `data` must be non-empty, every vector must have the same length, and
/// `k` must not exceed the number of points.
pub fn fit(data: &[Vec<f32>], params: &KMeansParams) -> Result<KMeansFit> {
    params.validate()?;
    let Some(first) = data.first() else {
        return Err(ClusterError::DataAbsence("no points to partition".into()));
    };
    let dims = first.len();
    if let Some(bad) = data.iter().find(|v| v.len() != dims) {
        return Err(ClusterError::DimensionMismatch {
            expected: dims,
            actual: bad.len(),
        });
    }
    if params.k > data.len() {
        return Err(ClusterError::Configuration(format!(
            "k ({}) must be <= number of points ({})",
            params.k,
            data.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<KMeansFit> = None;

    for run in 0..params.n_init {
        let candidate = fit_once(data, params, &mut rng);
        debug!(
            run,
            k = params.k,
            inertia = candidate.inertia,
            iterations = candidate.iterations,
            converged = candidate.converged,
            "k-means initialization finished"
        );
        if best.as_ref().is_none_or(|b| candidate.inertia < b.inertia) {
            best = Some(candidate);
        }
    }

    best.ok_or_else(|| ClusterError::Configuration("n_init must be > 0".into()))
}

fn fit_once(data: &[Vec<f32>], params: &KMeansParams, rng: &mut StdRng) -> KMeansFit {
    let n = data.len();
    let init_size = n.min((3 * params.batch_size).max(3 * params.k));
    let sample = sample_indices(n, init_size, rng);
    let mut centres = kmeans_plus_plus(data, &sample, params.k, rng);
    let mut counts = vec![0.0f64; params.k];

    let full_pass = params.batch_size >= n;
    let mut iterations = 0;
    let mut converged = false;

    for step in 0..params.max_iter {
        iterations = step + 1;
        let batch: Vec<usize> = if full_pass {
            (0..n).collect()
        } else {
            (0..params.batch_size).map(|_| rng.random_range(0..n)).collect()
        };

        let labels: Vec<usize> = batch
            .par_iter()
            .map(|&i| nearest(&data[i], &centres).0)
            .collect();

        let before = centres.clone();
        for (&i, &c) in batch.iter().zip(&labels) {
            counts[c] += 1.0;
            let lr = (1.0 / counts[c]) as f32;
            for (x, y) in centres[c].iter_mut().zip(&data[i]) {
                *x += lr * (y - *x);
            }
        }

        let shift = before
            .iter()
            .zip(&centres)
            .map(|(a, b)| f64::from(squared_distance(a, b)))
            .fold(0.0f64, f64::max);
        trace!(step, shift, "mini-batch step");
        if shift <= params.tolerance {
            converged = true;
            break;
        }
    }

    let assigned: Vec<(usize, f32)> = data.par_iter().map(|p| nearest(p, &centres)).collect();
    let inertia = assigned.iter().map(|&(_, d)| f64::from(d)).sum();
    let labels = assigned.into_iter().map(|(l, _)| l).collect();

    KMeansFit {
        centroids: centres,
        labels,
        inertia,
        iterations,
        converged,
    }
}

/// `size` distinct indices out of `0..n`, in random order.
fn sample_indices(n: usize, size: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    // Partial Fisher-Yates.
    for i in 0..size.min(n) {
        let j = rng.random_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(size);
    indices
}

/// k-means++ seeding over `data[sample]`.
fn kmeans_plus_plus(data: &[Vec<f32>], sample: &[usize], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centres = Vec::with_capacity(k);
    let first = sample[rng.random_range(0..sample.len())];
    centres.push(data[first].clone());

    let mut min_dist: Vec<f64> = sample
        .iter()
        .map(|&i| f64::from(squared_distance(&data[i], &data[first])))
        .collect();

    while centres.len() < k {
        let total: f64 = min_dist.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = sample.len() - 1;
            for (pos, d) in min_dist.iter().enumerate() {
                if target < *d {
                    chosen = pos;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            // Every sampled point sits on a centre already.
            rng.random_range(0..sample.len())
        };

        let centre = data[sample[pick]].clone();
        for (d, &i) in min_dist.iter_mut().zip(sample) {
            let nd = f64::from(squared_distance(&data[i], &centre));
            if nd < *d {
                *d = nd;
            }
        }
        centres.push(centre);
    }
    centres
}
