pub mod counts;
pub mod iou;
pub mod report;
pub mod threshold;

pub use counts::{multiple_metric, MetricCounts};
pub use iou::{iou, iou_matrix};
pub use report::{ScoreReport, ThresholdScore};
pub use threshold::ThresholdList;
