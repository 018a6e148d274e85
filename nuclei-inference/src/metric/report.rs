use crate::metric::MetricCounts;
use anyhow::{ensure, Result};
use log::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdScore {
    pub threshold: f32,
    pub score: f64,
    pub true_positives: u32,
    pub false_positives: u32,
    pub false_negatives: u32,
}

impl ThresholdScore {
    pub fn describe(&self) -> String {
        format!(
            "score={:.3}, tp={}, fp={}, fn={} --- iou {:.2}",
            self.score,
            self.true_positives,
            self.false_positives,
            self.false_negatives,
            self.threshold
        )
    }
}

/// Per-threshold and mean scores of one image or one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    pub rows: Vec<ThresholdScore>,
    pub score: f64,
    pub mean_true_positives: f64,
    pub mean_false_positives: f64,
    pub mean_false_negatives: f64,
}

impl ScoreReport {
    pub fn new(thresholds: &[f32], counts: &MetricCounts) -> Result<Self> {
        ensure!(
            thresholds.len() == counts.len(),
            "{} thresholds but counts for {}",
            thresholds.len(),
            counts.len()
        );

        let rows = thresholds
            .iter()
            .zip(counts.scores())
            .enumerate()
            .map(|(index, (&threshold, score))| ThresholdScore {
                threshold,
                score,
                true_positives: counts.true_positives[index],
                false_positives: counts.false_positives[index],
                false_negatives: counts.false_negatives[index],
            })
            .collect();

        let mean = |values: &ndarray::Array1<u32>| {
            values.iter().map(|&v| v as f64).sum::<f64>() / values.len().max(1) as f64
        };

        Ok(Self {
            rows,
            score: counts.score(),
            mean_true_positives: mean(&counts.true_positives),
            mean_false_positives: mean(&counts.false_positives),
            mean_false_negatives: mean(&counts.false_negatives),
        })
    }

    pub fn describe(&self) -> Vec<String> {
        self.rows.iter().map(ThresholdScore::describe).collect()
    }

    pub fn describe_mean(&self) -> String {
        format!(
            "score={:.3}, tp={:.1}, fp={:.1}, fn={:.1} --- mean",
            self.score,
            self.mean_true_positives,
            self.mean_false_positives,
            self.mean_false_negatives
        )
    }

    pub fn log(&self, verbose: bool) {
        for line in self.describe() {
            if verbose {
                info!("{}", line);
            } else {
                debug!("{}", line);
            }
        }
        if verbose {
            info!("{}", self.describe_mean());
        } else {
            debug!("{}", self.describe_mean());
        }
    }
}

#[test]
fn test_report_lines() -> Result<()> {
    use ndarray::array;

    let counts = MetricCounts {
        true_positives: array![3, 1],
        false_positives: array![1, 3],
        false_negatives: array![0, 2],
    };
    let report = ScoreReport::new(&[0.5, 0.75], &counts)?;

    assert_eq!(
        report.describe(),
        vec![
            "score=0.750, tp=3, fp=1, fn=0 --- iou 0.50".to_string(),
            "score=0.167, tp=1, fp=3, fn=2 --- iou 0.75".to_string(),
        ]
    );
    assert!((report.score - (0.75 + 1.0 / 6.0) / 2.0).abs() < 1e-9);
    assert_eq!(report.mean_true_positives, 2.0);
    assert_eq!(
        report.describe_mean(),
        "score=0.458, tp=2.0, fp=2.0, fn=1.0 --- mean"
    );

    assert!(ScoreReport::new(&[0.5], &counts).is_err());

    Ok(())
}
