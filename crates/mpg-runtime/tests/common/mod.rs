//! Shared fixtures for orchestrator scenarios.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mpg_promotion::{ModelStage, ModelVersion};
use mpg_registry::{
    InMemoryRegistry, ModelRegistry, PromotionTransition, RegistryError, StageTransition,
    TrainingRun,
};
use tokio::sync::{Barrier, Notify};

pub const MODEL: &str = "DemoModel";

pub fn run_with(run_id: &str, metrics: &[(&str, f64)]) -> TrainingRun {
    TrainingRun {
        metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        ..run(run_id, 0.0)
    }
}

pub fn run(run_id: &str, accuracy: f64) -> TrainingRun {
    TrainingRun {
        run_id: run_id.to_string(),
        experiment: "CI_CD_Automation_Demo".to_string(),
        params: BTreeMap::from([("n_estimators".to_string(), "50".to_string())]),
        metrics: BTreeMap::from([("accuracy".to_string(), accuracy)]),
        started_at_utc: Utc::now(),
    }
}

/// Wraps [`InMemoryRegistry`] with switchable faults and call counters.
#[derive(Default)]
pub struct FaultyRegistry {
    pub inner: InMemoryRegistry,
    pub fail_production_lookup: AtomicBool,
    /// Report a second PRODUCTION version from `production_version`.
    pub report_ambiguous_production: AtomicBool,
    pub promote_calls: AtomicUsize,
}

impl FaultyRegistry {
    pub fn promote_calls(&self) -> usize {
        self.promote_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRegistry for FaultyRegistry {
    async fn record_run(&self, run: &TrainingRun) -> Result<(), RegistryError> {
        self.inner.record_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<TrainingRun, RegistryError> {
        self.inner.get_run(run_id).await
    }

    async fn register_version(
        &self,
        model_name: &str,
        run_id: &str,
        metric_key: &str,
    ) -> Result<ModelVersion, RegistryError> {
        self.inner
            .register_version(model_name, run_id, metric_key)
            .await
    }

    async fn get_version(
        &self,
        model_name: &str,
        version: i64,
    ) -> Result<ModelVersion, RegistryError> {
        self.inner.get_version(model_name, version).await
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError> {
        self.inner.list_versions(model_name).await
    }

    async fn production_version(
        &self,
        model_name: &str,
    ) -> Result<Option<ModelVersion>, RegistryError> {
        if self.fail_production_lookup.load(Ordering::SeqCst) {
            return Err(RegistryError::RegistryUnavailable(
                "connection refused".to_string(),
            ));
        }
        if self.report_ambiguous_production.load(Ordering::SeqCst) {
            let now = Utc::now();
            let mk = |version| ModelVersion {
                model_name: model_name.to_string(),
                version,
                run_id: "ghost".to_string(),
                metric_key: "accuracy".to_string(),
                metric: 0.1,
                stage: ModelStage::Production,
                created_at_utc: now,
                stage_updated_at_utc: now,
            };
            return mpg_registry::single_production(model_name, vec![mk(90), mk(91)]);
        }
        self.inner.production_version(model_name).await
    }

    async fn promote(
        &self,
        model_name: &str,
        version: i64,
        expected_production: Option<i64>,
    ) -> Result<PromotionTransition, RegistryError> {
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .promote(model_name, version, expected_production)
            .await
    }

    async fn transitions(&self, model_name: &str) -> Result<Vec<StageTransition>, RegistryError> {
        self.inner.transitions(model_name).await
    }
}

/// Shared registry that lines two evaluations up on the same stale read.
///
/// The first two `production_version` calls wait for each other after
/// reading, so both callers see the same production version. `promote` of
/// `held_version` waits until another version's promote has committed.
pub struct RacingRegistry {
    pub inner: InMemoryRegistry,
    held_version: i64,
    lookups: AtomicUsize,
    after_lookup: Barrier,
    released: Notify,
}

impl RacingRegistry {
    pub fn new(held_version: i64) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryRegistry::new(),
            held_version,
            lookups: AtomicUsize::new(0),
            after_lookup: Barrier::new(2),
            released: Notify::new(),
        })
    }
}

#[async_trait]
impl ModelRegistry for RacingRegistry {
    async fn record_run(&self, run: &TrainingRun) -> Result<(), RegistryError> {
        self.inner.record_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> Result<TrainingRun, RegistryError> {
        self.inner.get_run(run_id).await
    }

    async fn register_version(
        &self,
        model_name: &str,
        run_id: &str,
        metric_key: &str,
    ) -> Result<ModelVersion, RegistryError> {
        self.inner
            .register_version(model_name, run_id, metric_key)
            .await
    }

    async fn get_version(
        &self,
        model_name: &str,
        version: i64,
    ) -> Result<ModelVersion, RegistryError> {
        self.inner.get_version(model_name, version).await
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError> {
        self.inner.list_versions(model_name).await
    }

    async fn production_version(
        &self,
        model_name: &str,
    ) -> Result<Option<ModelVersion>, RegistryError> {
        let current = self.inner.production_version(model_name).await;
        if self.lookups.fetch_add(1, Ordering::SeqCst) < 2 {
            self.after_lookup.wait().await;
        }
        current
    }

    async fn promote(
        &self,
        model_name: &str,
        version: i64,
        expected_production: Option<i64>,
    ) -> Result<PromotionTransition, RegistryError> {
        if version == self.held_version {
            self.released.notified().await;
            return self
                .inner
                .promote(model_name, version, expected_production)
                .await;
        }
        let res = self
            .inner
            .promote(model_name, version, expected_production)
            .await;
        self.released.notify_one();
        res
    }

    async fn transitions(&self, model_name: &str) -> Result<Vec<StageTransition>, RegistryError> {
        self.inner.transitions(model_name).await
    }
}
