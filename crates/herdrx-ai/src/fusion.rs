//! Multi-diagnosis aggregation: fuses per-diagnosis probability rows into one
//! ranked medicine list.
//!
//! Two strategies, selected by [`FusionPolicy`]:
//!
//! - **Summed**: column-wise sum of the `k` rows, ranked by descending sum.
//! - **Union**: each row's own top picks, interleaved by (diagnosis, rank),
//!   first occurrence of a medicine wins. Keeps per-diagnosis provenance.
//!
//! Ranking compares the rounded `confidence_percent`, so medicines that show
//! the same confidence keep ascending class-index order even when their raw
//! scores differ by float noise.

use std::cmp::Ordering;

use herdrx_core::{FusionPolicy, PipelineError};

use crate::labels::LabelDecoder;

/// Picks taken from each row under the union policy.
pub const UNION_PICKS_PER_DIAGNOSIS: usize = 5;

/// Result count for single-diagnosis legacy mode.
pub const LEGACY_TOP_N: usize = 2;

/// Result count for multi-diagnosis mode.
pub const DEFAULT_TOP_N: usize = 5;

/// One fused recommendation before response shaping.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMedicine {
    pub class_index: usize,
    pub medicine: String,
    pub confidence_percent: f64,
    /// Probability row the pick came from (union policy only).
    pub source_row: Option<usize>,
}

/// Fuse a `k × C` probability matrix into at most `top_n` ranked medicines.
pub fn aggregate(
    probs: &[Vec<f32>],
    decoder: &LabelDecoder,
    policy: FusionPolicy,
    top_n: usize,
) -> Result<Vec<RankedMedicine>, PipelineError> {
    check_widths(probs, decoder.len())?;
    if probs.is_empty() {
        return Ok(Vec::new());
    }

    let picks: Vec<(usize, f32, Option<usize>)> = match policy {
        FusionPolicy::Summed => {
            let sums = summed_scores(probs, decoder.len());
            rank_descending(&sums)
                .into_iter()
                .take(top_n)
                .map(|idx| (idx, sums[idx], None))
                .collect()
        }
        FusionPolicy::Union => union_picks(probs, UNION_PICKS_PER_DIAGNOSIS)
            .into_iter()
            .take(top_n)
            .map(|(row, idx)| (idx, probs[row][idx], Some(row)))
            .collect(),
    };

    picks
        .into_iter()
        .map(|(idx, score, source_row)| {
            Ok(RankedMedicine {
                class_index: idx,
                medicine: decoder.decode(idx)?.to_string(),
                confidence_percent: confidence_percent(score),
                source_row,
            })
        })
        .collect()
}

/// Element-wise column sum across rows.
pub fn summed_scores(probs: &[Vec<f32>], n_classes: usize) -> Vec<f32> {
    let mut sums = vec![0.0f32; n_classes];
    for row in probs {
        for (acc, &p) in sums.iter_mut().zip(row) {
            *acc += p;
        }
    }
    sums
}

/// Class indices by descending rounded confidence; equal confidences keep
/// ascending index order.
pub fn rank_descending(scores: &[f32]) -> Vec<usize> {
    let shown: Vec<f64> = scores.iter().map(|&s| confidence_percent(s)).collect();
    let mut order: Vec<usize> = (0..scores.len()).collect();
    // sort_by is stable.
    order.sort_by(|&a, &b| shown[b].partial_cmp(&shown[a]).unwrap_or(Ordering::Equal));
    order
}

/// Interleave each row's top `per_row` classes, keeping the first occurrence.
///
/// Returns `(row, class_index)` pairs in first-seen order.
fn union_picks(probs: &[Vec<f32>], per_row: usize) -> Vec<(usize, usize)> {
    let mut seen = vec![false; probs.first().map(Vec::len).unwrap_or(0)];
    let mut picks = Vec::new();
    for (row, p) in probs.iter().enumerate() {
        for idx in rank_descending(p).into_iter().take(per_row) {
            if !seen[idx] {
                seen[idx] = true;
                picks.push((row, idx));
            }
        }
    }
    picks
}

/// Probability → percent, rounded half away from zero to one decimal place.
pub fn confidence_percent(probability: f32) -> f64 {
    (probability as f64 * 1000.0).round() / 10.0
}

fn check_widths(probs: &[Vec<f32>], n_classes: usize) -> Result<(), PipelineError> {
    match probs.iter().position(|r| r.len() != n_classes) {
        Some(i) => Err(PipelineError::invariant(format!(
            "probability row {i} has {} classes, decoder has {n_classes}",
            probs[i].len()
        ))),
        None => Ok(()),
    }
}
