use crate::config::{CheckpointSelector, TrainConfig};
use crate::error::TrainError;
use crate::interrupt::InterruptFlag;
use crate::model::ModelKind;
use crate::pool::{MetricJob, MetricPool};
use crate::ports::{
    CheckpointStore, DatasetManager, EvaluationSink, NetworkFactory, Partition, Sample,
    SummaryWriter, TrainableNetwork,
};
use anyhow::Result;
use log::{debug, info, warn};
use nuclei_inference::inference::{ImageEvaluation, ImageEvaluator};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub name: String,
    /// Last epoch index that completed its checks.
    pub last_epoch: usize,
    pub best_loss: f64,
    pub best_miou: f64,
    pub train_score: f64,
    pub valid_score: f64,
}

/// `<tag or timestamp>_<model>_lr=<lr>_epoch=<n>_bs=<bs>`
pub fn run_name(config: &TrainConfig, kind: ModelKind) -> String {
    let prefix = if config.tag.is_empty() {
        chrono::Local::now().format("%y%m%dT%H%M%6f").to_string()
    } else {
        config.tag.clone()
    };

    format!(
        "{}_{}_lr={:.8}_epoch={}_bs={}",
        prefix, kind, config.learning_rate, config.epochs, config.batch_size
    )
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn not_built() -> TrainError {
    TrainError::Configuration("network is not built".into())
}

struct Progress {
    last_epoch: usize,
    best_loss: f64,
    best_miou: f64,
}

pub struct Trainer<F, D, C>
where
    D: DatasetManager,
    F: NetworkFactory<D::Batch>,
{
    config: TrainConfig,
    factory: F,
    dataset: D,
    checkpoints: C,
    summaries: Box<dyn SummaryWriter>,
    sink: Box<dyn EvaluationSink>,
    evaluator: ImageEvaluator,
    network: Option<F::Network>,
}

impl<F, D, C> Trainer<F, D, C>
where
    D: DatasetManager,
    F: NetworkFactory<D::Batch>,
    C: CheckpointStore<F::Network>,
{
    pub fn new(
        config: TrainConfig,
        factory: F,
        dataset: D,
        checkpoints: C,
        summaries: Box<dyn SummaryWriter>,
        sink: Box<dyn EvaluationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let evaluator = ImageEvaluator::new(config.pipeline.clone());

        Ok(Self {
            config,
            factory,
            dataset,
            checkpoints,
            summaries,
            sink,
            evaluator,
            network: None,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn network(&self) -> Result<&F::Network> {
        self.network
            .as_ref()
            .ok_or_else(|| not_built().into())
    }

    pub fn set_network(&mut self, kind: ModelKind) -> Result<()> {
        let network = self.factory.build(kind, self.config.batch_size)?;
        info!("constructing network model: {}", kind);
        self.network = Some(network);

        Ok(())
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    fn restore(&mut self, path: &str) -> Result<()> {
        let network = self
            .network
            .as_mut()
            .ok_or_else(not_built)?;

        self.checkpoints
            .restore(network, path)
            .map_err(|error| TrainError::ResourceRestore(format!("{path}: {error}")).into())
    }

    fn restore_initial(&mut self, name: &str) -> Result<()> {
        let path = match &self.config.checkpoint {
            CheckpointSelector::None => return Ok(()),
            CheckpointSelector::Best => self.checkpoints.best(name).ok_or_else(|| {
                TrainError::ResourceRestore(format!("no best checkpoint for {name}"))
            })?,
            CheckpointSelector::Latest => self.checkpoints.latest(name).ok_or_else(|| {
                TrainError::ResourceRestore(format!("no latest checkpoint for {name}"))
            })?,
            CheckpointSelector::Path(path) => path.clone(),
        };

        self.restore(&path)?;
        info!(
            "restored from {} checkpoint, {}",
            self.config.checkpoint, path
        );

        Ok(())
    }

    /// Trains, then evaluates the best checkpoint on the train, valid and
    /// (when `save_result`) test partitions.
    ///
    /// Setup errors are fatal. An interrupt only moves the run on to the
    /// final evaluation.
    pub fn run(&mut self, interrupt: &InterruptFlag) -> Result<TrainingSummary> {
        let kind = self.config.model_kind()?;
        self.set_network(kind)?;

        let name = run_name(&self.config, kind);
        info!("training started: {}", name);
        self.restore_initial(&name)?;

        let progress = self.train(&name, interrupt)?;
        self.final_evaluation(&name, progress)
    }

    fn train(&mut self, name: &str, interrupt: &InterruptFlag) -> Result<Progress> {
        let mut progress = Progress {
            last_epoch: 0,
            best_loss: 999999.0,
            best_miou: 0.0,
        };

        let train_size = self.dataset.train_size().max(1) as u64;
        let step = self.network()?.global_step();
        let start_epoch = (self.config.batch_size as u64 * step / train_size) as usize;
        if start_epoch > 0 {
            info!("resuming at epoch {}", start_epoch);
        }

        let pool = MetricPool::new(self.config.metric_workers)?;
        let mut losses: Vec<f64> = Vec::new();

        for epoch in start_epoch..self.config.epochs {
            let Some(loss) = self.train_epoch(epoch, interrupt)? else {
                info!("interrupted. stop training, start to validate.");
                break;
            };
            losses.push(loss);

            if self.reject_by_loss(epoch, &losses) {
                break;
            }

            progress.last_epoch = epoch;
            let on_interval = (epoch + 1) % self.config.valid_interval == 0;
            let schedule = self.config.schedule.clone();

            let mut valid_loss = 10.0;
            if loss < schedule.train_loss_gate as f64 && on_interval {
                valid_loss = self.validation_loss()?;
                if progress.best_loss > valid_loss {
                    progress.best_loss = valid_loss;
                }
            }

            if valid_loss < schedule.valid_loss_gate as f64
                && epoch > schedule.metric_after_epoch
                && on_interval
            {
                let miou = self.validation_metric(&pool)?;
                if progress.best_miou < miou {
                    progress.best_miou = miou;
                }

                let network = self
                    .network
                    .as_ref()
                    .ok_or_else(not_built)?;
                let step = network.global_step();
                if self.checkpoints.handle(name, miou, network)? {
                    debug!("checkpoint saved at step {} (mIoU {:.5})", step, miou);
                }

                if self.reject_by_miou(epoch, progress.best_miou) {
                    break;
                }
            }

            if interrupt.is_raised() {
                info!("interrupted. stop training, start to validate.");
                break;
            }
        }

        Ok(progress)
    }

    /// Mean batch loss of one pass, `None` once the interrupt is raised.
    fn train_epoch(&mut self, epoch: usize, interrupt: &InterruptFlag) -> Result<Option<f64>> {
        let network = self
            .network
            .as_mut()
            .ok_or_else(not_built)?;

        let mut total = 0.0;
        let mut count = 0usize;
        for batch in self.dataset.train_batches(self.config.batch_size)? {
            if interrupt.is_raised() {
                return Ok(None);
            }
            total += network.train_step(&batch?)? as f64;
            count += 1;
        }
        if interrupt.is_raised() {
            return Ok(None);
        }

        let loss = if count == 0 { 0.0 } else { total / count as f64 };
        let step = network.global_step();
        info!(
            "training {} epoch {} step, lr={:.8} loss={:.4} train_iter={}",
            epoch + 1,
            step,
            network.learning_rate(),
            loss,
            count
        );
        self.summaries
            .add_scalar(Partition::Train, "loss", loss, step)?;

        Ok(Some(loss))
    }

    fn reject_by_loss(&self, epoch: usize, losses: &[f64]) -> bool {
        if !self.config.early_rejection {
            return false;
        }

        let rejection = &self.config.rejection;
        let Some(&loss) = losses.last() else {
            return false;
        };

        if losses.len() > rejection.plateau_window
            && losses[losses.len() - rejection.plateau_window] * rejection.plateau_factor < loss
        {
            info!("not improved, stop at {}", epoch);
            return true;
        }

        if rejection
            .loss_limits
            .iter()
            .any(|limit| limit.epoch == epoch && loss > limit.value)
        {
            info!("not improved training loss, stop at {}", epoch);
            return true;
        }

        false
    }

    fn reject_by_miou(&self, epoch: usize, best_miou: f64) -> bool {
        if !self.config.early_rejection {
            return false;
        }

        let rejected = self
            .config
            .rejection
            .miou_floors
            .iter()
            .any(|floor| epoch > floor.epoch && best_miou < floor.value);
        if rejected {
            info!("mIoU {:.4} too low, stop at {}", best_miou, epoch);
        }

        rejected
    }

    fn validation_loss(&mut self) -> Result<f64> {
        let network = self
            .network
            .as_mut()
            .ok_or_else(not_built)?;

        let mut losses = Vec::new();
        for _ in 0..self.config.schedule.loss_passes {
            for batch in self.dataset.valid_batches(self.config.batch_size)? {
                losses.push(network.validation_loss(&batch?)? as f64);
            }
        }

        let loss = mean(&losses);
        info!("validation loss={:.4}", loss);
        let step = network.global_step();
        self.summaries
            .add_scalar(Partition::Valid, "loss", loss, step)?;

        Ok(loss)
    }

    /// Single-view predictions on every validation image, scored on the
    /// metric pool.
    fn validation_metric(&mut self, pool: &MetricPool) -> Result<f64> {
        let network = self.network()?;
        let mut jobs = Vec::new();

        for id in self.dataset.ids(Partition::Valid) {
            let sample = self.dataset.sample(&id, Partition::Valid)?;
            let target = sample.label_size();
            let predictions = self
                .evaluator
                .infer_single(network, sample.image, target)?;
            jobs.push(MetricJob {
                predictions,
                labels: sample.labels,
            });
        }

        let counts = pool.evaluate(&self.config.pipeline.thresholds, jobs)?;
        let miou = counts.score();
        info!("validation metric: {:.5}", miou);

        let step = network.global_step();
        self.summaries
            .add_scalar(Partition::Valid, "miou", miou, step)?;

        Ok(miou)
    }

    fn final_evaluation(&mut self, name: &str, progress: Progress) -> Result<TrainingSummary> {
        match self.checkpoints.best(name) {
            Some(path) => {
                info!(
                    "training is done. Start to evaluate the best model. {}",
                    path
                );
                if let Err(error) = self.restore(&path) {
                    warn!("error while loading the best model: {:#}", error);
                }
            }
            None => warn!("no best checkpoint for {}, evaluating current weights", name),
        }

        info!("Start to test on training set.... (may take a while)");
        let train_ids = self
            .dataset
            .ids(Partition::Train)
            .into_iter()
            .take(self.config.train_samples)
            .collect::<Vec<_>>();
        let train_score = self.evaluate_partition(Partition::Train, &train_ids)?;
        info!("trainset validation ends. score={:.4}", train_score);

        info!("Start to test on validation set.... (may take a while)");
        let valid_ids = self.dataset.ids(Partition::Valid);
        let valid_score = self.evaluate_partition(Partition::Valid, &valid_ids)?;
        info!("validation ends. score={:.4}", valid_score);

        info!("saving...");
        if self.config.save_result {
            let test_ids = self.dataset.ids(Partition::Test);
            self.evaluate_partition(Partition::Test, &test_ids)?;
            self.sink.finish()?;
        }

        info!(
            "done. epoch={} best_loss_val={:.4} best_mIOU={:.4} name= {}",
            progress.last_epoch, progress.best_loss, progress.best_miou, name
        );

        Ok(TrainingSummary {
            name: name.to_string(),
            last_epoch: progress.last_epoch,
            best_loss: progress.best_loss,
            best_miou: progress.best_miou,
            train_score,
            valid_score,
        })
    }

    fn evaluate_partition(&mut self, partition: Partition, ids: &[String]) -> Result<f64> {
        let mut scores = Vec::with_capacity(ids.len());
        for id in ids {
            let sample = self.dataset.sample(id, partition)?;
            let evaluation = self.evaluate_sample(&sample, false)?;
            self.sink.accept(partition, &sample, &evaluation)?;
            scores.push(evaluation.score());
        }

        Ok(mean(&scores))
    }

    fn evaluate_sample(&self, sample: &Sample, verbose: bool) -> Result<ImageEvaluation> {
        let network = self.network()?;
        let (width, height) = sample.image.get_size();
        if verbose {
            info!("{} image size=({} x {})", sample.id, width, height);
        }

        let ground_truth = sample.ground_truth();
        let evaluation =
            self.evaluator
                .evaluate(network, sample.image.clone(), ground_truth.as_deref())?;

        if let Some(report) = &evaluation.report {
            if verbose {
                info!(
                    "instances={}, reinf({:.3}) labels={}",
                    evaluation.instances.len(),
                    evaluation.resize_target,
                    ground_truth.as_ref().map_or(0, Vec::len)
                );
            }
            report.log(verbose);
        }

        Ok(evaluation)
    }

    /// Multi-view evaluation of one image by id.
    pub fn single_id(&self, id: &str, partition: Partition) -> Result<ImageEvaluation> {
        let sample = self.dataset.sample(id, partition)?;
        self.evaluate_sample(&sample, true)
    }

    /// Mean multi-view score over the validation partition.
    pub fn validate(&self) -> Result<f64> {
        let mut scores = Vec::new();
        for id in self.dataset.ids(Partition::Valid) {
            scores.push(self.single_id(&id, Partition::Valid)?.score());
        }

        let score = mean(&scores);
        info!("mScore = {:.5}", score);

        Ok(score)
    }

    /// Restores `path` into the current network, building it first if
    /// needed.
    pub fn load_checkpoint(&mut self, path: &str) -> Result<()> {
        if self.network.is_none() {
            self.set_network(self.config.model_kind()?)?;
        }
        self.restore(path)?;
        info!("restored from checkpoint, {}", path);

        Ok(())
    }
}

#[test]
fn test_run_name_format() {
    let config = TrainConfig {
        tag: "exp1".into(),
        ..TrainConfig::default()
    };
    assert_eq!(
        run_name(&config, ModelKind::Unet),
        "exp1_unet_lr=0.00010000_epoch=600_bs=16"
    );

    let untagged = run_name(&TrainConfig::default(), ModelKind::Basic);
    assert!(untagged.ends_with("_basic_lr=0.00010000_epoch=600_bs=16"));
}
