//! Probabilistic classification over encoded feature matrices.
//!
//! The pipeline only depends on the [`ProbabilisticClassifier`] capability:
//! fit on class indices, emit one probability row per input row. The shipped
//! [`CentroidClassifier`] standardizes every column, computes one centroid per
//! class, and turns squared distances into a softmax over classes. Missing
//! (`NaN`) and infinite cells are skipped in both fitting and scoring.

use herdrx_core::{FeatureMatrix, PipelineError};
use serde::{Deserialize, Serialize};

/// Black-box multi-class probability model.
///
/// Class `i` of the output rows is label index `i`; callers pass indices from
/// the label decoder at fit time.
pub trait ProbabilisticClassifier: Sized {
    fn fit(x: &FeatureMatrix, y: &[usize], n_classes: usize) -> Result<Self, PipelineError>;

    /// One row per input row, each summing to 1 over `n_classes()` entries.
    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f32>>, PipelineError>;

    fn n_classes(&self) -> usize;

    fn n_features(&self) -> usize;
}

/// Nearest-centroid classifier with softmax probabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidClassifier {
    /// Per-column mean over non-missing training values.
    means: Vec<f32>,
    /// Per-column standard deviation (1.0 for constant columns).
    scales: Vec<f32>,
    /// `n_classes × n_features`, in standardized units.
    centroids: Vec<Vec<f32>>,
    /// Laplace-smoothed class log-priors.
    log_priors: Vec<f32>,
}

const MIN_SCALE: f32 = 1e-6;

impl ProbabilisticClassifier for CentroidClassifier {
    fn fit(x: &FeatureMatrix, y: &[usize], n_classes: usize) -> Result<Self, PipelineError> {
        if x.n_rows() == 0 {
            return Err(PipelineError::InsufficientData(
                "no training rows to fit".into(),
            ));
        }
        if x.n_rows() != y.len() {
            return Err(PipelineError::invariant(format!(
                "{} feature rows but {} labels",
                x.n_rows(),
                y.len()
            )));
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(PipelineError::invariant(format!(
                "label index {bad} out of range for {n_classes} classes"
            )));
        }

        let dim = x.n_cols();
        let (means, scales) = column_stats(x.rows(), dim);

        // Accumulate: class → (sum_vector, count_vector) in standardized units.
        let mut sums = vec![vec![0.0f32; dim]; n_classes];
        let mut counts = vec![vec![0usize; dim]; n_classes];
        let mut class_rows = vec![0usize; n_classes];

        for (row, &class) in x.rows().iter().zip(y) {
            class_rows[class] += 1;
            for (j, &v) in row.iter().enumerate() {
                if !v.is_finite() {
                    continue;
                }
                sums[class][j] += (v - means[j]) / scales[j];
                counts[class][j] += 1;
            }
        }

        let centroids = finalize_centroids(sums, &counts);

        let total = (y.len() + n_classes) as f32;
        let log_priors = class_rows
            .iter()
            .map(|&n| ((n + 1) as f32 / total).ln())
            .collect();

        Ok(Self {
            means,
            scales,
            centroids,
            log_priors,
        })
    }

    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f32>>, PipelineError> {
        if x.n_cols() != self.n_features() {
            return Err(PipelineError::invariant(format!(
                "matrix has {} columns, classifier expects {}",
                x.n_cols(),
                self.n_features()
            )));
        }
        Ok(x.rows().iter().map(|row| self.score_row(row)).collect())
    }

    fn n_classes(&self) -> usize {
        self.centroids.len()
    }

    fn n_features(&self) -> usize {
        self.means.len()
    }
}

impl CentroidClassifier {
    fn score_row(&self, row: &[f32]) -> Vec<f32> {
        // Distances are accumulated in f64 so large but finite inputs cannot
        // overflow to an all-infinite logit row.
        let z: Vec<Option<f64>> = row
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(&v, (&m, &s))| v.is_finite().then(|| (v as f64 - m as f64) / s as f64))
            .collect();

        let logits: Vec<f64> = self
            .centroids
            .iter()
            .zip(&self.log_priors)
            .map(|(centroid, &prior)| {
                let d2: f64 = z
                    .iter()
                    .zip(centroid)
                    .filter_map(|(zj, &c)| zj.map(|v| (v - c as f64).powi(2)))
                    .sum();
                prior as f64 - 0.5 * d2
            })
            .collect();

        softmax(&logits)
            .or_else(|| {
                let priors: Vec<f64> = self.log_priors.iter().map(|&p| p as f64).collect();
                softmax(&priors)
            })
            .unwrap_or_else(|| uniform(self.centroids.len()))
    }
}

// ── Fitting helpers ──

/// Mean and standard deviation per column, skipping missing cells.
fn column_stats(rows: &[Vec<f32>], dim: usize) -> (Vec<f32>, Vec<f32>) {
    let mut means = vec![0.0f32; dim];
    let mut scales = vec![1.0f32; dim];

    for j in 0..dim {
        let values: Vec<f64> = rows
            .iter()
            .map(|r| r[j])
            .filter(|v| v.is_finite())
            .map(f64::from)
            .collect();
        if values.is_empty() {
            continue;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        means[j] = mean as f32;
        let sd = var.sqrt() as f32;
        if sd.is_finite() && sd > MIN_SCALE {
            scales[j] = sd;
        }
    }

    (means, scales)
}

/// Mean per dimension; dimensions a class never observed sit at the global mean.
fn finalize_centroids(sums: Vec<Vec<f32>>, counts: &[Vec<usize>]) -> Vec<Vec<f32>> {
    sums.into_iter()
        .zip(counts)
        .map(|(mut sum, count)| {
            for (v, &n) in sum.iter_mut().zip(count) {
                *v = if n > 0 { *v / n as f32 } else { 0.0 };
            }
            sum
        })
        .collect()
}

/// `None` when any logit is `NaN` or the largest one is not finite.
fn softmax(logits: &[f64]) -> Option<Vec<f32>> {
    if logits.iter().any(|l| l.is_nan()) {
        return None;
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    Some(exps.into_iter().map(|e| (e / total) as f32).collect())
}

fn uniform(n: usize) -> Vec<f32> {
    vec![1.0 / n as f32; n]
}
