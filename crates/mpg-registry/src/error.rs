use mpg_promotion::ModelStage;
use thiserror::Error;

/// Errors surfaced by [`crate::ModelRegistry`] backends.
///
/// "No production version" is not an error; it is `Ok(None)` from
/// `production_version`.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Backend could not be reached or failed mid-operation.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// More than one version is in PRODUCTION. Never auto-resolved.
    #[error("model {model_name} has multiple PRODUCTION versions: {versions:?}")]
    AmbiguousMultipleProduction {
        model_name: String,
        versions: Vec<i64>,
    },

    /// Another writer promoted the same model name at the same moment and the
    /// backend refused the second PRODUCTION row. Safe to retry.
    #[error("concurrent promotion of {model_name} rejected by registry")]
    ConcurrentPromotion { model_name: String },

    #[error("unknown version {model_name} v{version}")]
    UnknownVersion { model_name: String, version: i64 },

    #[error("unknown training run {0}")]
    UnknownRun(String),

    #[error("training run {run_id} has no metric '{metric_key}'")]
    MetricMissing { run_id: String, metric_key: String },

    #[error("metric '{metric_key}' of run {run_id} is not finite ({value})")]
    NonFiniteMetric {
        run_id: String,
        metric_key: String,
        value: f64,
    },

    /// `promote` found a different production version than the caller
    /// evaluated against. Nothing was changed; re-read and decide again.
    #[error(
        "production version of {model_name} changed during evaluation: \
         expected {expected:?}, found {actual:?}"
    )]
    ProductionChanged {
        model_name: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    #[error("invalid stage transition for {model_name} v{version}: {from} -> {to}")]
    InvalidTransition {
        model_name: String,
        version: i64,
        from: ModelStage,
        to: ModelStage,
    },
}

impl RegistryError {
    /// True for errors that indicate the stored state breaks the registry invariant.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, RegistryError::AmbiguousMultipleProduction { .. })
    }

    /// True when the caller may re-read production and decide again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::ProductionChanged { .. } | RegistryError::ConcurrentPromotion { .. }
        )
    }
}
