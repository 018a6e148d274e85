#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// Bad model name or configuration value; fatal at setup.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Checkpoint missing or unreadable.
    #[error("cannot restore checkpoint: {0}")]
    ResourceRestore(String),
}
