#![cfg_attr(debug_assertions, allow(warnings))]

use tracing_subscriber::filter::LevelFilter;

pub mod config;
pub mod error;
pub mod interrupt;
pub mod model;
pub mod pool;
pub mod ports;
pub mod trainer;

pub use config::{CheckpointSelector, EarlyRejection, EpochLimit, TrainConfig, ValidationSchedule};
pub use error::TrainError;
pub use interrupt::{run_blocking, InterruptFlag};
pub use model::ModelKind;
pub use pool::{MetricJob, MetricPool};
pub use ports::{
    BatchIter, CheckpointStore, DatasetManager, EvaluationSink, LogSummaryWriter, NetworkFactory,
    Partition, Sample, SummaryWriter, TrainableNetwork,
};
pub use trainer::{run_name, Trainer, TrainingSummary};

/// Installs a stdout subscriber at debug level. Later calls are no-ops.
pub fn log_init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .try_init();
}
