//! Generic seeded RANSAC engine.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. Failure to
//! find consensus is not an error: the returned [`RansacResult`] has
//! `success == false` and no model.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Configuration for the RANSAC loop.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Maximum number of iterations.
    pub max_iters: usize,
    /// Inlier residual threshold, in the estimator's residual units.
    pub thresh: f64,
    /// Minimum number of inliers required to accept a model.
    pub min_inliers: usize,
    /// Desired confidence in `[0, 1]` for finding a good model.
    pub confidence: f64,
    /// Seed for reproducible sampling.
    pub seed: u64,
    /// Refit the model on the full inlier set before scoring.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        RansacOptions {
            max_iters: 1000,
            thresh: 2.0,
            min_inliers: 6,
            confidence: 0.99,
            seed: 1_234_567,
            refit_on_inliers: true,
        }
    }
}

/// Output of one RANSAC run. When `success` is false, `model` is
/// `None` and the remaining fields are unspecified.
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub success: bool,
    pub model: Option<M>,
    /// Indices of inlier data points.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over inliers.
    pub inlier_rms: f64,
    /// Iterations actually performed.
    pub iters: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        RansacResult {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }
}

/// Model estimator driven by the RANSAC loop.
///
/// Methods take `&self` so an estimator can carry fixed context such
/// as camera intrinsics.
pub trait Estimator {
    type Datum;
    type Model;

    /// Minimal number of samples needed to fit a model.
    fn min_samples(&self) -> usize;

    /// Fit a model from a subset of data indices; `None` when the
    /// subset is degenerate or fitting fails.
    fn fit(&self, data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Non-negative residual for one datum, in the units of
    /// `RansacOptions::thresh`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Degeneracy check on the sampled subset.
    fn is_degenerate(&self, _data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }

    /// Refit on the full inlier set; `None` keeps the original model.
    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

fn rms(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::INFINITY;
    }
    let ss: f64 = vals.iter().map(|&v| v * v).sum();
    (ss / vals.len() as f64).sqrt()
}

/// Adaptive iteration bound from the running inlier ratio.
fn calculate_iterations(
    confidence: f64,
    inlier_ratio: f64,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }
    let denom = (1.0 - inlier_ratio.powf(min_samples as f64)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }
    let n_iter = ((1.0 - confidence).ln() / denom).ceil() as usize;
    n_iter.clamp(iters_so_far, max_iters)
}

fn is_better_model(
    has_current_best: bool,
    new_inlier_count: usize,
    new_inlier_rms: f64,
    best_inlier_count: usize,
    best_inlier_rms: f64,
) -> bool {
    !has_current_best
        || new_inlier_count > best_inlier_count
        || (new_inlier_count == best_inlier_count && new_inlier_rms < best_inlier_rms)
}

/// Run the RANSAC loop for the given estimator. Never panics; with
/// insufficient data or no consensus the result has `success == false`.
pub fn ransac<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    opts: &RansacOptions,
) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();

    let min_samples = estimator.min_samples();
    if data.len() < min_samples {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample_idxs = vec![0usize; min_samples];
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut dynamic_max_iters = opts.max_iters;

    let mut inliers = Vec::<usize>::new();
    let mut inlier_residuals = Vec::<f64>::new();
    let mut refined_inliers = Vec::<usize>::new();
    let mut refined_residuals = Vec::<f64>::new();

    let mut num_iters = 0;
    while num_iters < dynamic_max_iters {
        num_iters += 1;
        all_indices
            .as_slice()
            .choose_multiple(&mut rng, min_samples)
            .enumerate()
            .for_each(|(k, &idx)| sample_idxs[k] = idx);

        if estimator.is_degenerate(data, &sample_idxs) {
            continue;
        }
        let Some(model) = estimator.fit(data, &sample_idxs) else {
            continue;
        };

        inliers.clear();
        inlier_residuals.clear();
        for (i, datum) in data.iter().enumerate() {
            let r = estimator.residual(&model, datum);
            if r <= opts.thresh {
                inliers.push(i);
                inlier_residuals.push(r);
            }
        }
        if inliers.len() < opts.min_inliers {
            continue;
        }

        let mut model_refit = model;
        let (final_inliers, final_residuals) = if opts.refit_on_inliers {
            refined_inliers.clear();
            refined_inliers.extend_from_slice(&inliers);
            refined_residuals.clear();
            refined_residuals.extend_from_slice(&inlier_residuals);

            if let Some(m2) = estimator.refit(data, &refined_inliers) {
                model_refit = m2;
                refined_inliers.clear();
                refined_residuals.clear();
                for (i, datum) in data.iter().enumerate() {
                    let r = estimator.residual(&model_refit, datum);
                    if r <= opts.thresh {
                        refined_inliers.push(i);
                        refined_residuals.push(r);
                    }
                }
            }
            (&refined_inliers, &refined_residuals)
        } else {
            (&inliers, &inlier_residuals)
        };

        let final_rms = rms(final_residuals);
        if is_better_model(
            best.success,
            final_inliers.len(),
            final_rms,
            best.inliers.len(),
            best.inlier_rms,
        ) {
            best.success = true;
            best.model = Some(model_refit);
            best.inliers = final_inliers.clone();
            best.inlier_rms = final_rms;
            best.iters = num_iters;
        }

        let inlier_ratio = final_inliers.len() as f64 / data.len() as f64;
        dynamic_max_iters = calculate_iterations(
            opts.confidence,
            inlier_ratio,
            min_samples,
            num_iters,
            opts.max_iters,
        );
    }

    best
}
