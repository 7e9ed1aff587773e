//! In-process registry backend.
//!
//! All state sits behind one mutex, so `promote` (archive + promote) is a
//! single critical section and no reader can observe two production versions.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use mpg_promotion::{ModelStage, ModelVersion};

use crate::types::{single_production, PromotionTransition, StageTransition, TrainingRun};
use crate::{ModelRegistry, RegistryError};

#[derive(Debug, Default)]
struct MemoryState {
    runs: BTreeMap<String, TrainingRun>,
    /// model_name -> versions ascending by version number
    models: BTreeMap<String, Vec<ModelVersion>>,
    transitions: BTreeMap<String, Vec<StageTransition>>,
}

/// Registry backed by process memory. Suitable for tests and single-process
/// pipelines; contents are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<MemoryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RegistryError> {
        self.state
            .lock()
            .map_err(|_| RegistryError::RegistryUnavailable("registry state poisoned".into()))
    }
}

#[async_trait]
impl ModelRegistry for InMemoryRegistry {
    async fn record_run(&self, run: &TrainingRun) -> Result<(), RegistryError> {
        run.check_metrics_finite()?;
        let mut st = self.lock()?;
        st.runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<TrainingRun, RegistryError> {
        let st = self.lock()?;
        st.runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownRun(run_id.to_string()))
    }

    async fn register_version(
        &self,
        model_name: &str,
        run_id: &str,
        metric_key: &str,
    ) -> Result<ModelVersion, RegistryError> {
        let mut st = self.lock()?;
        let metric = st
            .runs
            .get(run_id)
            .ok_or_else(|| RegistryError::UnknownRun(run_id.to_string()))?
            .finite_metric(metric_key)?;

        let versions = st.models.entry(model_name.to_string()).or_default();
        let next = versions.last().map(|v| v.version + 1).unwrap_or(1);
        let now = Utc::now();
        let mv = ModelVersion {
            model_name: model_name.to_string(),
            version: next,
            run_id: run_id.to_string(),
            metric_key: metric_key.to_string(),
            metric,
            stage: ModelStage::Candidate,
            created_at_utc: now,
            stage_updated_at_utc: now,
        };
        versions.push(mv.clone());
        Ok(mv)
    }

    async fn get_version(
        &self,
        model_name: &str,
        version: i64,
    ) -> Result<ModelVersion, RegistryError> {
        let st = self.lock()?;
        st.models
            .get(model_name)
            .and_then(|vs| vs.iter().find(|v| v.version == version))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownVersion {
                model_name: model_name.to_string(),
                version,
            })
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError> {
        let st = self.lock()?;
        Ok(st.models.get(model_name).cloned().unwrap_or_default())
    }

    async fn production_version(
        &self,
        model_name: &str,
    ) -> Result<Option<ModelVersion>, RegistryError> {
        let st = self.lock()?;
        let versions = st.models.get(model_name).cloned().unwrap_or_default();
        single_production(model_name, versions)
    }

    async fn promote(
        &self,
        model_name: &str,
        version: i64,
        expected_production: Option<i64>,
    ) -> Result<PromotionTransition, RegistryError> {
        let mut guard = self.lock()?;
        let st = &mut *guard;

        let unknown = || RegistryError::UnknownVersion {
            model_name: model_name.to_string(),
            version,
        };
        let versions = st.models.get_mut(model_name).ok_or_else(unknown)?;
        let target_idx = versions
            .iter()
            .position(|v| v.version == version)
            .ok_or_else(unknown)?;

        let from = versions[target_idx].stage;
        if !from.can_transition_to(ModelStage::Production) {
            return Err(RegistryError::InvalidTransition {
                model_name: model_name.to_string(),
                version,
                from,
                to: ModelStage::Production,
            });
        }

        // Validate before mutating anything.
        let previous = single_production(model_name, versions.iter().cloned())?;
        let actual = previous.as_ref().map(|p| p.version);
        if actual != expected_production {
            return Err(RegistryError::ProductionChanged {
                model_name: model_name.to_string(),
                expected: expected_production,
                actual,
            });
        }

        let now = Utc::now();
        let mut transitions = Vec::with_capacity(2);
        let mut archived = None;

        if let Some(prev) = previous {
            if let Some(p) = versions.iter_mut().find(|v| v.version == prev.version) {
                p.stage = ModelStage::Archived;
                p.stage_updated_at_utc = now;
                archived = Some(p.clone());
            }
            transitions.push(StageTransition {
                model_name: model_name.to_string(),
                version: prev.version,
                from_stage: ModelStage::Production,
                to_stage: ModelStage::Archived,
                ts_utc: now,
            });
        }

        let target = &mut versions[target_idx];
        target.stage = ModelStage::Production;
        target.stage_updated_at_utc = now;
        let promoted = target.clone();

        transitions.push(StageTransition {
            model_name: model_name.to_string(),
            version,
            from_stage: from,
            to_stage: ModelStage::Production,
            ts_utc: now,
        });

        st.transitions
            .entry(model_name.to_string())
            .or_default()
            .extend(transitions.iter().cloned());

        Ok(PromotionTransition {
            promoted,
            archived,
            transitions,
        })
    }

    async fn transitions(&self, model_name: &str) -> Result<Vec<StageTransition>, RegistryError> {
        let st = self.lock()?;
        Ok(st.transitions.get(model_name).cloned().unwrap_or_default())
    }
}
