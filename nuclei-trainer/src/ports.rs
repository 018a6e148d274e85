use crate::model::ModelKind;
use anyhow::Result;
use log::debug;
use ndarray::Array2;
use nuclei_inference::engine::InstanceSegmentation;
use nuclei_inference::inference::ImageEvaluation;
use nuclei_inference::utils::masks::instances_from_label_map;
use nuclei_inference::InstanceMask;
use nuclei_media::Image;
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Partition {
    Train,
    Valid,
    Test,
}

impl Display for Partition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Train => f.write_str("train"),
            Partition::Valid => f.write_str("valid"),
            Partition::Test => f.write_str("test"),
        }
    }
}

/// One full-size image with its optional label map
/// (`0` background, `k` the k-th nucleus).
#[derive(Debug, Clone)]
pub struct Sample {
    pub id: String,
    pub image: Image,
    pub labels: Option<Array2<u32>>,
}

impl Sample {
    /// Ground-truth instances, `None` when the sample carries no labelled
    /// object.
    pub fn ground_truth(&self) -> Option<Vec<InstanceMask>> {
        let labels = self.labels.as_ref()?;
        let instances = instances_from_label_map(labels.view());
        if instances.is_empty() {
            None
        } else {
            Some(instances)
        }
    }

    /// `(width, height)` of the label map, falling back to the image.
    pub fn label_size(&self) -> (usize, usize) {
        match &self.labels {
            Some(labels) => (labels.ncols(), labels.nrows()),
            None => self.image.get_size(),
        }
    }
}

/// A network that can also be optimised on batches of `B`.
pub trait TrainableNetwork<B>: InstanceSegmentation {
    /// One optimiser step; returns the batch loss.
    fn train_step(&mut self, batch: &B) -> Result<f32>;

    fn validation_loss(&mut self, batch: &B) -> Result<f32>;

    fn global_step(&self) -> u64;

    fn learning_rate(&self) -> f64;
}

pub trait NetworkFactory<B> {
    type Network: TrainableNetwork<B>;

    fn build(&self, kind: ModelKind, batch_size: usize) -> Result<Self::Network>;
}

pub type BatchIter<'a, B> = Box<dyn Iterator<Item = Result<B>> + 'a>;

pub trait DatasetManager {
    type Batch;

    /// Number of training images, used to derive the resume epoch.
    fn train_size(&self) -> usize;

    /// Fresh pass over augmented training batches.
    fn train_batches(&mut self, batch_size: usize) -> Result<BatchIter<'_, Self::Batch>>;

    fn valid_batches(&mut self, batch_size: usize) -> Result<BatchIter<'_, Self::Batch>>;

    fn ids(&self, partition: Partition) -> Vec<String>;

    fn sample(&self, id: &str, partition: Partition) -> Result<Sample>;
}

pub trait CheckpointStore<N> {
    fn restore(&mut self, network: &mut N, path: &str) -> Result<()>;

    /// Checkpoint with the highest recorded metric for `run`.
    fn best(&self, run: &str) -> Option<String>;

    fn latest(&self, run: &str) -> Option<String>;

    /// Saves `network` if `metric` beats every earlier one; returns whether
    /// it did.
    fn handle(&mut self, run: &str, metric: f64, network: &N) -> Result<bool>;
}

pub trait SummaryWriter {
    fn add_scalar(&mut self, scope: Partition, tag: &str, value: f64, step: u64) -> Result<()>;
}

/// Writes summaries as debug log lines.
#[derive(Debug, Default)]
pub struct LogSummaryWriter;

impl SummaryWriter for LogSummaryWriter {
    fn add_scalar(&mut self, scope: Partition, tag: &str, value: f64, step: u64) -> Result<()> {
        debug!("[{}] {}={:.4} step={}", scope, tag, value, step);
        Ok(())
    }
}

/// Receives the per-image results of the final evaluation.
pub trait EvaluationSink {
    fn accept(
        &mut self,
        partition: Partition,
        sample: &Sample,
        evaluation: &ImageEvaluation,
    ) -> Result<()>;

    /// Called once after the test partition, only when results are saved.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_sample_ground_truth() -> Result<()> {
    let image = Image::zeros((4, 3), 3)?;
    let mut sample = Sample {
        id: "a".into(),
        image,
        labels: Some(Array2::zeros((3, 4))),
    };
    assert!(sample.ground_truth().is_none());
    assert_eq!(sample.label_size(), (4, 3));

    sample.labels = Some(Array2::from_shape_fn((3, 4), |(y, x)| (x == y) as u32));
    assert_eq!(sample.ground_truth().map(|masks| masks.len()), Some(1));

    sample.labels = None;
    assert!(sample.ground_truth().is_none());

    Ok(())
}
