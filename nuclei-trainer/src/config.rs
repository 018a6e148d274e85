use crate::error::TrainError;
use crate::model::ModelKind;
use anyhow::Result;
use nuclei_inference::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Where the initial weights come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CheckpointSelector {
    /// Fresh initialisation.
    #[default]
    None,
    Best,
    Latest,
    Path(String),
}

impl From<String> for CheckpointSelector {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "none" => CheckpointSelector::None,
            "best" => CheckpointSelector::Best,
            "latest" => CheckpointSelector::Latest,
            _ => CheckpointSelector::Path(value),
        }
    }
}

impl From<CheckpointSelector> for String {
    fn from(value: CheckpointSelector) -> Self {
        value.to_string()
    }
}

impl Display for CheckpointSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointSelector::None => f.write_str("none"),
            CheckpointSelector::Best => f.write_str("best"),
            CheckpointSelector::Latest => f.write_str("latest"),
            CheckpointSelector::Path(path) => f.write_str(path),
        }
    }
}

/// Gates deciding when validation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSchedule {
    /// Validation loss is computed only below this training loss.
    pub train_loss_gate: f32,
    /// Metric validation needs a validation loss below this...
    pub valid_loss_gate: f32,
    /// ...and an epoch index above this.
    pub metric_after_epoch: usize,
    pub loss_passes: usize,
}

impl Default for ValidationSchedule {
    fn default() -> Self {
        Self {
            train_loss_gate: 0.20,
            valid_loss_gate: 0.16,
            metric_after_epoch: 50,
            loss_passes: 5,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLimit {
    pub epoch: usize,
    pub value: f64,
}

/// Constants of the early rejection rules, used only when
/// `TrainConfig::early_rejection` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyRejection {
    pub plateau_window: usize,
    pub plateau_factor: f64,
    /// Stop when the loss at exactly `epoch` is above `value`.
    pub loss_limits: Vec<EpochLimit>,
    /// Stop when past `epoch` the best mIoU is still below `value`.
    pub miou_floors: Vec<EpochLimit>,
}

impl Default for EarlyRejection {
    fn default() -> Self {
        Self {
            plateau_window: 100,
            plateau_factor: 1.05,
            loss_limits: vec![
                EpochLimit { epoch: 50, value: 0.5 },
                EpochLimit { epoch: 200, value: 0.2 },
            ],
            miou_floors: vec![
                EpochLimit { epoch: 50, value: 0.15 },
                EpochLimit { epoch: 100, value: 0.25 },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub model: String,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub early_rejection: bool,
    pub valid_interval: usize,
    /// Run name prefix; a timestamp when empty.
    pub tag: String,
    pub save_result: bool,
    pub checkpoint: CheckpointSelector,
    pub metric_workers: usize,
    /// Training images shown in the final evaluation.
    pub train_samples: usize,
    pub schedule: ValidationSchedule,
    pub rejection: EarlyRejection,
    pub pipeline: PipelineConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::Unet.to_string(),
            epochs: 600,
            batch_size: 16,
            learning_rate: 0.0001,
            early_rejection: false,
            valid_interval: 10,
            tag: String::new(),
            save_result: true,
            checkpoint: CheckpointSelector::None,
            metric_workers: 8,
            train_samples: 20,
            schedule: ValidationSchedule::default(),
            rejection: EarlyRejection::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: TrainConfig = serde_yml::from_str(yaml)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn model_kind(&self) -> Result<ModelKind, TrainError> {
        self.model.parse()
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        self.model_kind()?;

        if self.batch_size == 0 {
            return Err(TrainError::Configuration("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TrainError::Configuration(format!(
                "learning_rate {} must be positive",
                self.learning_rate
            )));
        }
        if self.valid_interval == 0 {
            return Err(TrainError::Configuration("valid_interval must be positive".into()));
        }
        if self.metric_workers == 0 {
            return Err(TrainError::Configuration("metric_workers must be positive".into()));
        }
        if self.rejection.plateau_window == 0 {
            return Err(TrainError::Configuration(
                "rejection.plateau_window must be positive".into(),
            ));
        }

        self.pipeline
            .validate()
            .map_err(|error| TrainError::Configuration(error.to_string()))
    }
}

#[test]
fn test_defaults_match_reference_run() {
    let config = TrainConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.epochs, 600);
    assert_eq!(config.batch_size, 16);
    assert_eq!(config.metric_workers, 8);
    assert_eq!(config.schedule.loss_passes, 5);
}

#[test]
fn test_checkpoint_selector_strings() {
    assert_eq!(CheckpointSelector::from(String::new()), CheckpointSelector::None);
    assert_eq!(CheckpointSelector::from("best".to_string()), CheckpointSelector::Best);
    assert_eq!(
        CheckpointSelector::from("runs/a/model-120".to_string()),
        CheckpointSelector::Path("runs/a/model-120".into())
    );
    assert_eq!(String::from(CheckpointSelector::Latest), "latest");
}

#[test]
fn test_invalid_values_are_configuration_errors() {
    let mut config = TrainConfig::default();
    config.model = "vgg".into();
    assert!(matches!(config.validate(), Err(TrainError::Configuration(_))));

    let mut config = TrainConfig::default();
    config.pipeline.nms.iou_threshold = 1.5;
    assert!(matches!(config.validate(), Err(TrainError::Configuration(_))));
}
