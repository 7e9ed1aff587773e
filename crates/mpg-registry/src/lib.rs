//! mpg-registry
//!
//! Model registry contract used by the promotion orchestrator, plus an
//! in-process backend. The Postgres backend lives in `mpg-db`.
//!
//! Every backend must uphold: at most one version per model name is in
//! stage `PRODUCTION`, and `promote` archives the previous production
//! version in the same atomic step, after checking that the production
//! version is still the one the caller decided against.

mod error;
mod memory;
mod types;

pub use error::RegistryError;
pub use memory::InMemoryRegistry;
pub use types::{single_production, PromotionTransition, StageTransition, TrainingRun};

use std::sync::Arc;

use async_trait::async_trait;
use mpg_promotion::ModelVersion;

/// Storage-agnostic registry client.
///
/// Implementations are passed into the orchestrator as explicit values; there
/// is no process-global client.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Store a finished training run with its params and metrics.
    /// Non-finite metric values are refused.
    async fn record_run(&self, run: &TrainingRun) -> Result<(), RegistryError>;

    async fn get_run(&self, run_id: &str) -> Result<TrainingRun, RegistryError>;

    /// Register a new `CANDIDATE` version of `model_name` produced by `run_id`,
    /// taking its metric from the run under `metric_key`.
    /// Version numbers are assigned per name, starting at 1.
    async fn register_version(
        &self,
        model_name: &str,
        run_id: &str,
        metric_key: &str,
    ) -> Result<ModelVersion, RegistryError>;

    async fn get_version(&self, model_name: &str, version: i64)
        -> Result<ModelVersion, RegistryError>;

    /// All versions of `model_name`, ascending by version.
    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError>;

    /// Current production version.
    ///
    /// `Ok(None)` means no production version exists. Lookup failures are
    /// errors, never `None`.
    async fn production_version(
        &self,
        model_name: &str,
    ) -> Result<Option<ModelVersion>, RegistryError>;

    /// Move `version` to `PRODUCTION`, archiving any previous production
    /// version of the same name in the same atomic operation.
    ///
    /// `expected_production` is the production version the caller evaluated
    /// against (`None` for "no production"). If the stored production version
    /// differs at commit time nothing changes and
    /// [`RegistryError::ProductionChanged`] is returned.
    async fn promote(
        &self,
        model_name: &str,
        version: i64,
        expected_production: Option<i64>,
    ) -> Result<PromotionTransition, RegistryError>;

    /// Stage transition history for `model_name`, oldest first.
    async fn transitions(&self, model_name: &str) -> Result<Vec<StageTransition>, RegistryError>;
}

/// One registry shared by several orchestrators.
#[async_trait]
impl<T: ModelRegistry + ?Sized> ModelRegistry for Arc<T> {
    async fn record_run(&self, run: &TrainingRun) -> Result<(), RegistryError> {
        (**self).record_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<TrainingRun, RegistryError> {
        (**self).get_run(run_id).await
    }

    async fn register_version(
        &self,
        model_name: &str,
        run_id: &str,
        metric_key: &str,
    ) -> Result<ModelVersion, RegistryError> {
        (**self).register_version(model_name, run_id, metric_key).await
    }

    async fn get_version(
        &self,
        model_name: &str,
        version: i64,
    ) -> Result<ModelVersion, RegistryError> {
        (**self).get_version(model_name, version).await
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError> {
        (**self).list_versions(model_name).await
    }

    async fn production_version(
        &self,
        model_name: &str,
    ) -> Result<Option<ModelVersion>, RegistryError> {
        (**self).production_version(model_name).await
    }

    async fn promote(
        &self,
        model_name: &str,
        version: i64,
        expected_production: Option<i64>,
    ) -> Result<PromotionTransition, RegistryError> {
        (**self)
            .promote(model_name, version, expected_production)
            .await
    }

    async fn transitions(&self, model_name: &str) -> Result<Vec<StageTransition>, RegistryError> {
        (**self).transitions(model_name).await
    }
}
