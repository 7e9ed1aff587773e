use mpg_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The stage transition (if any) already committed; only the log line is missing.
    #[error("decision log write failed: {0:#}")]
    DecisionLog(anyhow::Error),

    #[error("promotion report write failed: {0}")]
    Report(#[from] std::io::Error),

    /// The model name cannot be used as a single report directory segment.
    #[error("model name {0:?} is not usable as a report directory name")]
    InvalidModelName(String),
}

impl PromotionError {
    pub fn registry(&self) -> Option<&RegistryError> {
        match self {
            PromotionError::Registry(e) => Some(e),
            _ => None,
        }
    }
}
