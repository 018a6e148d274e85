use crate::metric::iou::iou_matrix;
use crate::InstanceMask;
use anyhow::{ensure, Result};
use ndarray::Array1;
use std::cmp::Ordering;

/// Per-threshold true/false positive and false negative counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCounts {
    pub true_positives: Array1<u32>,
    pub false_positives: Array1<u32>,
    pub false_negatives: Array1<u32>,
}

impl MetricCounts {
    pub fn zeros(thresholds: usize) -> Self {
        Self {
            true_positives: Array1::zeros(thresholds),
            false_positives: Array1::zeros(thresholds),
            false_negatives: Array1::zeros(thresholds),
        }
    }

    pub fn len(&self) -> usize {
        self.true_positives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.true_positives.is_empty()
    }

    /// Element-wise sum. Order of merging never changes the result.
    pub fn merge(mut self, other: &MetricCounts) -> Result<Self> {
        ensure!(
            self.len() == other.len(),
            "cannot merge metric counts over {} and {} thresholds",
            self.len(),
            other.len()
        );

        self.true_positives += &other.true_positives;
        self.false_positives += &other.false_positives;
        self.false_negatives += &other.false_negatives;

        Ok(self)
    }

    /// `tp / (tp + fp + fn)` per threshold; zero where nothing was counted.
    pub fn scores(&self) -> Vec<f64> {
        (0..self.len())
            .map(|index| {
                let tp = self.true_positives[index] as f64;
                let denominator =
                    tp + (self.false_positives[index] + self.false_negatives[index]) as f64;
                if denominator == 0.0 {
                    0.0
                } else {
                    tp / denominator
                }
            })
            .collect()
    }

    /// Mean of [`Self::scores`], zero without thresholds.
    pub fn score(&self) -> f64 {
        let scores = self.scores();
        if scores.is_empty() {
            return 0.0;
        }

        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// Matches predictions to ground truth once per threshold and counts the
/// outcome.
///
/// Matching is greedy over pairs by descending IoU, each mask is used at most
/// once, and a pair only counts when its IoU is at least the threshold.
pub fn multiple_metric(
    thresholds: &[f32],
    predictions: &[InstanceMask],
    ground_truth: &[InstanceMask],
) -> Result<MetricCounts> {
    let mut counts = MetricCounts::zeros(thresholds.len());

    if ground_truth.is_empty() || predictions.is_empty() {
        counts.false_positives.fill(predictions.len() as u32);
        counts.false_negatives.fill(ground_truth.len() as u32);
        return Ok(counts);
    }

    let ious = iou_matrix(predictions, ground_truth)?;
    let mut pairs = ious
        .indexed_iter()
        .filter(|(_, &value)| value > 0.0)
        .map(|((prediction, truth), &value)| (prediction, truth, value))
        .collect::<Vec<_>>();
    pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));

    for (index, &threshold) in thresholds.iter().enumerate() {
        let mut prediction_used = vec![false; predictions.len()];
        let mut truth_used = vec![false; ground_truth.len()];
        let mut matched = 0u32;

        for &(prediction, truth, value) in &pairs {
            if value < threshold {
                break;
            }
            if prediction_used[prediction] || truth_used[truth] {
                continue;
            }
            prediction_used[prediction] = true;
            truth_used[truth] = true;
            matched += 1;
        }

        counts.true_positives[index] = matched;
        counts.false_positives[index] = predictions.len() as u32 - matched;
        counts.false_negatives[index] = ground_truth.len() as u32 - matched;
    }

    Ok(counts)
}

#[test]
fn test_degenerate_inputs() -> Result<()> {
    let thresholds = [0.5, 0.75];
    let mask = InstanceMask::from_fn(8, 8, |x, _| x < 4);

    let counts = multiple_metric(&thresholds, &[], &[])?;
    assert_eq!(counts, MetricCounts::zeros(2));
    assert_eq!(counts.score(), 0.0);

    let counts = multiple_metric(&thresholds, &[mask.clone(), mask.clone()], &[])?;
    assert_eq!(counts.false_positives.to_vec(), vec![2, 2]);
    assert_eq!(counts.true_positives.to_vec(), vec![0, 0]);
    assert_eq!(counts.false_negatives.to_vec(), vec![0, 0]);

    let counts = multiple_metric(&thresholds, &[], &[mask])?;
    assert_eq!(counts.false_negatives.to_vec(), vec![1, 1]);

    Ok(())
}

#[test]
fn test_matching_depends_on_threshold() -> Result<()> {
    // prediction covers 12 of 16 truth pixels: IoU = 0.75
    let truth = InstanceMask::from_fn(10, 10, |x, y| x < 4 && y < 4);
    let prediction = InstanceMask::from_fn(10, 10, |x, y| x < 4 && y < 3);

    let counts = multiple_metric(&[0.5, 0.7, 0.8], &[prediction], &[truth])?;
    assert_eq!(counts.true_positives.to_vec(), vec![1, 1, 0]);
    assert_eq!(counts.false_positives.to_vec(), vec![0, 0, 1]);
    assert_eq!(counts.false_negatives.to_vec(), vec![0, 0, 1]);
    assert!((counts.score() - 2.0 / 3.0).abs() < 1e-9);

    Ok(())
}

#[test]
fn test_each_truth_matched_once() -> Result<()> {
    let truth = InstanceMask::from_fn(10, 10, |x, _| x < 5);
    let duplicate = truth.clone();

    let counts = multiple_metric(&[0.5], &[truth.clone(), duplicate], &[truth])?;
    assert_eq!(counts.true_positives[0], 1);
    assert_eq!(counts.false_positives[0], 1);
    assert_eq!(counts.false_negatives[0], 0);

    Ok(())
}

#[test]
fn test_merge_is_order_independent() -> Result<()> {
    let thresholds = [0.5, 0.9];
    let a = InstanceMask::from_fn(6, 6, |x, _| x < 3);
    let b = InstanceMask::from_fn(6, 6, |x, y| x < 3 && y < 5);
    let c = InstanceMask::from_fn(6, 6, |x, _| x >= 3);

    let parts = vec![
        multiple_metric(&thresholds, &[a.clone()], &[b.clone()])?,
        multiple_metric(&thresholds, &[c.clone()], &[a.clone()])?,
        multiple_metric(&thresholds, &[a, b], &[c])?,
    ];

    let forward = parts
        .iter()
        .try_fold(MetricCounts::zeros(2), |acc, part| acc.merge(part))?;
    let backward = parts
        .iter()
        .rev()
        .try_fold(MetricCounts::zeros(2), |acc, part| acc.merge(part))?;
    assert_eq!(forward, backward);

    assert!(MetricCounts::zeros(1).merge(&MetricCounts::zeros(2)).is_err());

    Ok(())
}
