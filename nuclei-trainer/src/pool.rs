use anyhow::Result;
use log::debug;
use ndarray::Array2;
use nuclei_inference::metric::{multiple_metric, MetricCounts};
use nuclei_inference::utils::masks::instances_from_label_map;
use nuclei_inference::InstanceMask;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Predictions for one validation image and its label map.
#[derive(Debug, Clone)]
pub struct MetricJob {
    pub predictions: Vec<InstanceMask>,
    pub labels: Option<Array2<u32>>,
}

impl MetricJob {
    pub fn counts(&self, thresholds: &[f32]) -> Result<MetricCounts> {
        let ground_truth = match &self.labels {
            Some(labels) => instances_from_label_map(labels.view()),
            None => Vec::new(),
        };

        multiple_metric(thresholds, &self.predictions, &ground_truth)
    }
}

/// Fixed-size worker pool for batch metric computation.
pub struct MetricPool {
    pool: ThreadPool,
}

impl MetricPool {
    pub fn new(workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("metric-{index}"))
            .build()?;

        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Counts every job in parallel and sums the results. The first failing
    /// job's error is returned.
    pub fn evaluate(&self, thresholds: &[f32], jobs: Vec<MetricJob>) -> Result<MetricCounts> {
        debug!("Scoring {} images on {} workers", jobs.len(), self.workers());

        self.pool.install(|| {
            jobs.into_par_iter()
                .map(|job| job.counts(thresholds))
                .try_reduce(
                    || MetricCounts::zeros(thresholds.len()),
                    |left, right| left.merge(&right),
                )
        })
    }
}

#[cfg(test)]
fn square_labels(size: usize, squares: &[(usize, usize, usize)]) -> Array2<u32> {
    let mut labels = Array2::zeros((size, size));
    for (label, &(x, y, side)) in squares.iter().enumerate() {
        for row in y..y + side {
            for col in x..x + side {
                labels[[row, col]] = label as u32 + 1;
            }
        }
    }
    labels
}

#[test]
fn test_pool_matches_sequential_sum() -> Result<()> {
    let thresholds = [0.5, 0.75, 0.95];
    let jobs = (0..16)
        .map(|index| {
            let labels = square_labels(24, &[(2, 2, 6), (12, 12, 8)]);
            let mut predictions = instances_from_label_map(labels.view());
            if index % 3 == 0 {
                predictions.pop();
            }
            if index % 4 == 0 {
                predictions.push(InstanceMask::from_fn(24, 24, |x, y| x < 2 && y > 20));
            }
            MetricJob {
                predictions,
                labels: (index % 5 != 0).then_some(labels),
            }
        })
        .collect::<Vec<_>>();

    let sequential = jobs.iter().try_fold(MetricCounts::zeros(3), |acc, job| {
        acc.merge(&job.counts(&thresholds)?)
    })?;
    let parallel = MetricPool::new(8)?.evaluate(&thresholds, jobs)?;

    assert_eq!(parallel, sequential);

    Ok(())
}

#[test]
fn test_pool_surfaces_job_errors() -> Result<()> {
    let job = MetricJob {
        predictions: vec![InstanceMask::empty(8, 8)],
        labels: Some(square_labels(16, &[(0, 0, 4)])),
    };

    assert!(MetricPool::new(2)?.evaluate(&[0.5], vec![job]).is_err());

    Ok(())
}
