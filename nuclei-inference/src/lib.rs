#![cfg_attr(debug_assertions, allow(warnings))]

pub mod config;
pub mod engine;
pub mod inference;
pub mod metric;
pub mod utils;

pub use config::{ConfigError, NmsConfig, PipelineConfig, RescaleConfig, VotingConfig};
pub use utils::masks::{InstanceMask, MaskError};
