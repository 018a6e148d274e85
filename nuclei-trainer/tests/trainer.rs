use anyhow::{anyhow, bail, Result};
use ndarray::Array2;
use nuclei_inference::engine::{InferenceOutput, InstanceSegmentation};
use nuclei_inference::inference::ImageEvaluation;
use nuclei_inference::utils::masks::visualize;
use nuclei_inference::InstanceMask;
use nuclei_media::Image;
use nuclei_trainer::{
    BatchIter, CheckpointSelector, CheckpointStore, DatasetManager, EvaluationSink,
    InterruptFlag, LogSummaryWriter, ModelKind, NetworkFactory, Partition, Sample, TrainConfig,
    TrainError, TrainableNetwork, Trainer,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Finds the bright disc; every batch is just the loss it should report.
struct FakeNetwork {
    step: u64,
}

impl InstanceSegmentation for FakeNetwork {
    fn inference(&self, image: &Image) -> Result<InferenceOutput> {
        let mask = InstanceMask::from_plane(image.plane(0), 0.5);
        if mask.is_empty() {
            return Ok(InferenceOutput::default());
        }
        Ok(InferenceOutput::new(vec![mask], vec![0.9]))
    }
}

impl TrainableNetwork<f32> for FakeNetwork {
    fn train_step(&mut self, batch: &f32) -> Result<f32> {
        self.step += 1;
        Ok(*batch)
    }

    fn validation_loss(&mut self, batch: &f32) -> Result<f32> {
        Ok(*batch)
    }

    fn global_step(&self) -> u64 {
        self.step
    }

    fn learning_rate(&self) -> f64 {
        0.0001
    }
}

struct FakeFactory;

impl NetworkFactory<f32> for FakeFactory {
    type Network = FakeNetwork;

    fn build(&self, _kind: ModelKind, _batch_size: usize) -> Result<FakeNetwork> {
        Ok(FakeNetwork { step: 0 })
    }
}

struct FakeDataset {
    train_loss: f32,
    valid_loss: f32,
    batches_per_epoch: usize,
    train_size: usize,
    ids: HashMap<Partition, Vec<String>>,
}

impl FakeDataset {
    fn new(train_loss: f32, valid_loss: f32) -> Self {
        let ids = [
            (Partition::Train, 25),
            (Partition::Valid, 3),
            (Partition::Test, 2),
        ]
        .into_iter()
        .map(|(partition, count)| {
            let ids = (0..count).map(|i| format!("{partition}-{i}")).collect();
            (partition, ids)
        })
        .collect();

        Self {
            train_loss,
            valid_loss,
            batches_per_epoch: 2,
            train_size: 32,
            ids,
        }
    }
}

fn disc_labels(size: usize, cx: f32, cy: f32, radius: f32) -> Array2<u32> {
    Array2::from_shape_fn((size, size), |(y, x)| {
        ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2) <= radius * radius) as u32
    })
}

impl DatasetManager for FakeDataset {
    type Batch = f32;

    fn train_size(&self) -> usize {
        self.train_size
    }

    fn train_batches(&mut self, _batch_size: usize) -> Result<BatchIter<'_, f32>> {
        let loss = self.train_loss;
        Ok(Box::new((0..self.batches_per_epoch).map(move |_| Ok(loss))))
    }

    fn valid_batches(&mut self, _batch_size: usize) -> Result<BatchIter<'_, f32>> {
        let loss = self.valid_loss;
        Ok(Box::new(std::iter::once(Ok(loss))))
    }

    fn ids(&self, partition: Partition) -> Vec<String> {
        self.ids.get(&partition).cloned().unwrap_or_default()
    }

    fn sample(&self, id: &str, partition: Partition) -> Result<Sample> {
        let labels = disc_labels(64, 30.0, 34.0, 10.0);
        let image = Image::from_gray(labels.mapv(|label| label as f32))?;

        Ok(Sample {
            id: id.to_string(),
            image,
            labels: (partition != Partition::Test).then_some(labels),
        })
    }
}

#[derive(Default)]
struct FakeStore {
    best: Option<String>,
    restorable: Vec<String>,
    restore_step: u64,
    handled: Vec<f64>,
    restored: Vec<String>,
}

impl CheckpointStore<FakeNetwork> for FakeStore {
    fn restore(&mut self, network: &mut FakeNetwork, path: &str) -> Result<()> {
        if !self.restorable.iter().any(|p| p == path) {
            bail!("checkpoint {path} is missing");
        }
        network.step = self.restore_step;
        self.restored.push(path.to_string());
        Ok(())
    }

    fn best(&self, _run: &str) -> Option<String> {
        self.best.clone()
    }

    fn latest(&self, _run: &str) -> Option<String> {
        None
    }

    fn handle(&mut self, _run: &str, metric: f64, _network: &FakeNetwork) -> Result<bool> {
        let improved = self.handled.iter().all(|&m| m < metric);
        self.handled.push(metric);
        Ok(improved)
    }
}

#[derive(Default)]
struct Recorded {
    accepted: Vec<(Partition, String, f64, usize)>,
    finished: usize,
}

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Recorded>>);

impl EvaluationSink for RecordingSink {
    fn accept(
        &mut self,
        partition: Partition,
        sample: &Sample,
        evaluation: &ImageEvaluation,
    ) -> Result<()> {
        let overlay = visualize(&sample.image, evaluation.instances.instances())?;
        assert_eq!(overlay.get_size(), sample.image.get_size());

        self.0.lock().accepted.push((
            partition,
            sample.id.clone(),
            evaluation.score(),
            evaluation.instances.len(),
        ));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.0.lock().finished += 1;
        Ok(())
    }
}

fn config(epochs: usize) -> TrainConfig {
    TrainConfig {
        model: "unet".into(),
        epochs,
        tag: "test".into(),
        metric_workers: 2,
        ..TrainConfig::default()
    }
}

fn trainer(
    config: TrainConfig,
    dataset: FakeDataset,
    store: FakeStore,
    sink: RecordingSink,
) -> Result<Trainer<FakeFactory, FakeDataset, FakeStore>> {
    Trainer::new(
        config,
        FakeFactory,
        dataset,
        store,
        Box::new(LogSummaryWriter),
        Box::new(sink),
    )
}

fn train_error(error: &anyhow::Error) -> Option<&TrainError> {
    error.downcast_ref::<TrainError>()
}

#[test]
fn unknown_model_is_fatal() {
    nuclei_trainer::log_init();
    let config = TrainConfig {
        model: "resnet".into(),
        ..config(1)
    };

    let error = trainer(
        config,
        FakeDataset::new(0.5, 0.5),
        FakeStore::default(),
        RecordingSink::default(),
    )
    .err()
    .expect("model name is rejected");
    assert!(matches!(train_error(&error), Some(TrainError::Configuration(_))));
}

#[test]
fn initial_restore_failure_is_fatal() -> Result<()> {
    let config = TrainConfig {
        checkpoint: CheckpointSelector::Path("runs/missing".into()),
        ..config(1)
    };
    let sink = RecordingSink::default();
    let mut trainer = trainer(
        config,
        FakeDataset::new(0.5, 0.5),
        FakeStore::default(),
        sink.clone(),
    )?;

    let error = trainer.run(&InterruptFlag::new()).err().ok_or(anyhow!("run succeeded"))?;
    assert!(matches!(train_error(&error), Some(TrainError::ResourceRestore(_))));
    assert!(sink.0.lock().accepted.is_empty());

    let config = TrainConfig {
        checkpoint: CheckpointSelector::Best,
        ..self::config(1)
    };
    let mut trainer = self::trainer(
        config,
        FakeDataset::new(0.5, 0.5),
        FakeStore::default(),
        RecordingSink::default(),
    )?;
    let error = trainer.run(&InterruptFlag::new()).err().ok_or(anyhow!("run succeeded"))?;
    assert!(matches!(train_error(&error), Some(TrainError::ResourceRestore(_))));

    Ok(())
}

#[test]
fn final_restore_failure_only_warns() -> Result<()> {
    let store = FakeStore {
        best: Some("runs/corrupt".into()),
        ..FakeStore::default()
    };
    let sink = RecordingSink::default();
    let mut trainer = trainer(config(2), FakeDataset::new(0.5, 0.5), store, sink.clone())?;

    let summary = trainer.run(&InterruptFlag::new())?;
    assert_eq!(summary.last_epoch, 1);
    assert!(trainer.checkpoints().restored.is_empty());
    assert_eq!(sink.0.lock().accepted.len(), 20 + 3 + 2);

    Ok(())
}

#[test]
fn interrupt_moves_straight_to_final_evaluation() -> Result<()> {
    let interrupt = InterruptFlag::new();
    interrupt.raise();

    let sink = RecordingSink::default();
    let mut trainer = trainer(
        config(600),
        FakeDataset::new(0.1, 0.1),
        FakeStore::default(),
        sink.clone(),
    )?;

    let summary = trainer.run(&interrupt)?;
    assert_eq!(trainer.network()?.global_step(), 0);
    assert_eq!(summary.best_miou, 0.0);
    assert!(trainer.checkpoints().handled.is_empty());

    let recorded = sink.0.lock();
    let count = |partition| {
        recorded
            .accepted
            .iter()
            .filter(|(p, ..)| *p == partition)
            .count()
    };
    assert_eq!(count(Partition::Train), 20);
    assert_eq!(count(Partition::Valid), 3);
    assert_eq!(count(Partition::Test), 2);
    assert_eq!(recorded.finished, 1);

    // the disc is found in every view and matches its label exactly
    assert_eq!(summary.train_score, 1.0);
    assert_eq!(summary.valid_score, 1.0);
    assert!(recorded
        .accepted
        .iter()
        .filter(|(p, ..)| *p == Partition::Test)
        .all(|(_, _, score, instances)| *score == 0.0 && *instances == 1));

    Ok(())
}

#[test]
fn loss_limit_rejects_early() -> Result<()> {
    let config = TrainConfig {
        early_rejection: true,
        save_result: false,
        ..config(300)
    };
    let sink = RecordingSink::default();
    let mut trainer = trainer(
        config,
        FakeDataset::new(0.9, 0.9),
        FakeStore::default(),
        sink.clone(),
    )?;

    let summary = trainer.run(&InterruptFlag::new())?;
    // epoch 50 trains, then its loss check stops the run
    assert_eq!(trainer.network()?.global_step(), 51 * 2);
    assert_eq!(summary.last_epoch, 49);
    assert_eq!(sink.0.lock().finished, 0);

    Ok(())
}

#[test]
fn metric_validation_hands_checkpoints_over() -> Result<()> {
    let sink = RecordingSink::default();
    let mut trainer = trainer(
        TrainConfig {
            save_result: false,
            ..config(70)
        },
        FakeDataset::new(0.1, 0.1),
        FakeStore::default(),
        sink,
    )?;

    let summary = trainer.run(&InterruptFlag::new())?;
    // epochs 59 and 69 pass every gate
    assert_eq!(trainer.checkpoints().handled, vec![1.0, 1.0]);
    assert_eq!(summary.best_miou, 1.0);
    assert!((summary.best_loss - 0.1).abs() < 1e-6);
    assert_eq!(summary.last_epoch, 69);

    Ok(())
}

#[test]
fn resumes_from_restored_step() -> Result<()> {
    let store = FakeStore {
        restorable: vec!["runs/a".into()],
        restore_step: 64,
        ..FakeStore::default()
    };
    let config = TrainConfig {
        checkpoint: CheckpointSelector::Path("runs/a".into()),
        save_result: false,
        ..config(33)
    };
    let mut trainer = trainer(config, FakeDataset::new(0.5, 0.5), store, RecordingSink::default())?;

    let summary = trainer.run(&InterruptFlag::new())?;
    // 16 * 64 / 32 = epoch 32, one epoch left
    assert_eq!(trainer.network()?.global_step(), 64 + 2);
    assert_eq!(summary.last_epoch, 32);
    assert_eq!(trainer.checkpoints().restored, vec!["runs/a".to_string()]);

    Ok(())
}

#[test]
fn single_id_and_validate() -> Result<()> {
    let mut trainer = trainer(
        config(0),
        FakeDataset::new(0.1, 0.1),
        FakeStore::default(),
        RecordingSink::default(),
    )?;
    assert!(trainer.single_id("valid-0", Partition::Valid).is_err());

    trainer.set_network(ModelKind::Unet)?;
    let evaluation = trainer.single_id("valid-0", Partition::Valid)?;
    assert_eq!(evaluation.instances.len(), 1);
    assert_eq!(evaluation.candidates, 6);
    assert_eq!(evaluation.score(), 1.0);

    let test = trainer.single_id("test-0", Partition::Test)?;
    assert!(test.report.is_none());

    assert_eq!(trainer.validate()?, 1.0);

    Ok(())
}

#[test]
fn yaml_configuration() -> Result<()> {
    let config = TrainConfig::from_yaml_str(
        r#"
model: deeplabv3p
epochs: 120
batch_size: 8
checkpoint: latest
pipeline:
  nms:
    iou_threshold: 0.4
  voting:
    min_votes: 4
"#,
    )?;

    assert_eq!(config.model_kind()?, ModelKind::DeepLabV3p);
    assert_eq!(config.epochs, 120);
    assert_eq!(config.checkpoint, CheckpointSelector::Latest);
    assert_eq!(config.pipeline.nms.iou_threshold, 0.4);
    assert_eq!(config.pipeline.voting.min_votes, 4);
    assert_eq!(config.pipeline.voting.iou_threshold, 0.3);
    assert_eq!(config.learning_rate, 0.0001);

    let error = TrainConfig::from_yaml_str("model: vgg16").unwrap_err();
    assert!(matches!(train_error(&error), Some(TrainError::Configuration(_))));

    Ok(())
}
