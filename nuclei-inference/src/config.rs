use crate::metric::ThresholdList;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("invalid pipeline configuration: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingConfig {
    /// Two candidates agree when their IoU is strictly above this.
    pub iou_threshold: f32,
    /// Self-inclusive agreement needed when `reference_views` views are pooled.
    pub min_votes: usize,
    pub reference_views: usize,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            min_votes: 5,
            reference_views: 6,
        }
    }
}

impl VotingConfig {
    /// Agreement needed for `views` transform variants, scaled from
    /// `min_votes / reference_views` and rounded up.
    pub fn required_votes(&self, views: usize) -> usize {
        (self.min_votes * views).div_ceil(self.reference_views)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmsConfig {
    /// A candidate is suppressed once its IoU with an accepted mask reaches this.
    pub iou_threshold: f32,
}

impl Default for NmsConfig {
    fn default() -> Self {
        Self { iou_threshold: 0.3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RescaleConfig {
    pub target_object_size: f32,
    pub min_short_edge: f32,
    pub min_factor: f32,
    pub max_factor: f32,
}

impl Default for RescaleConfig {
    fn default() -> Self {
        Self {
            target_object_size: 80.0,
            min_short_edge: 228.0,
            min_factor: 0.75,
            max_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub voting: VotingConfig,
    pub nms: NmsConfig,
    pub rescale: RescaleConfig,
    pub thresholds: ThresholdList,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.voting.iou_threshold) {
            return Err(ConfigError(format!(
                "voting.iou_threshold {} is outside [0, 1]",
                self.voting.iou_threshold
            )));
        }
        if self.voting.reference_views == 0 {
            return Err(ConfigError("voting.reference_views must be positive".into()));
        }
        if !unit.contains(&self.nms.iou_threshold) {
            return Err(ConfigError(format!(
                "nms.iou_threshold {} is outside [0, 1]",
                self.nms.iou_threshold
            )));
        }

        let rescale = &self.rescale;
        if !(rescale.min_factor > 0.0 && rescale.min_factor <= rescale.max_factor) {
            return Err(ConfigError(format!(
                "rescale factors must satisfy 0 < min ({}) <= max ({})",
                rescale.min_factor, rescale.max_factor
            )));
        }
        if rescale.target_object_size <= 0.0 || rescale.min_short_edge < 0.0 {
            return Err(ConfigError(
                "rescale.target_object_size must be positive and min_short_edge non-negative"
                    .into(),
            ));
        }

        if self.thresholds.is_empty() {
            return Err(ConfigError("thresholds must not be empty".into()));
        }
        // matching never pairs masks that do not overlap
        if self.thresholds.iter().any(|&t| !(t > 0.0 && t <= 1.0)) {
            return Err(ConfigError("thresholds must lie in (0, 1]".into()));
        }

        Ok(())
    }
}

#[test]
fn test_required_votes_scale_with_views() {
    let voting = VotingConfig::default();
    assert_eq!(voting.required_votes(6), 5);
    assert_eq!(voting.required_votes(3), 3);
    assert_eq!(voting.required_votes(12), 10);
    assert_eq!(voting.required_votes(1), 1);
}

#[test]
fn test_default_config_is_valid() {
    assert!(PipelineConfig::default().validate().is_ok());

    let mut config = PipelineConfig::default();
    config.rescale.min_factor = 3.0;
    assert!(config.validate().is_err());

    let mut config = PipelineConfig::default();
    config.thresholds = ThresholdList::from(vec![0.0, 0.5]);
    let error = config.validate().unwrap_err();
    assert!(error.to_string().contains("(0, 1]"));

    config.thresholds = ThresholdList::from(vec![1.0]);
    assert!(config.validate().is_ok());
}
