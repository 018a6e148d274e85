use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// IoU cut-offs shared by every scoring call in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdList(Vec<f32>);

impl Default for ThresholdList {
    /// `0.50, 0.55, ..., 0.95`
    fn default() -> Self {
        Self((0..10).map(|step| (50 + 5 * step) as f32 / 100.0).collect())
    }
}

impl Deref for ThresholdList {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<f32>> for ThresholdList {
    fn from(value: Vec<f32>) -> Self {
        Self(value)
    }
}

#[test]
fn test_default_thresholds() {
    let thresholds = ThresholdList::default();
    assert_eq!(thresholds.len(), 10);
    assert_eq!(thresholds[0], 0.5);
    assert_eq!(thresholds[9], 0.95);
}
