use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use mpg_audit::DecisionLogWriter;
use mpg_promotion::{
    evaluate_candidate, write_promotion_report_json, ModelStage, ModelVersion,
    PromotionDecision, PromotionReport,
};
use mpg_registry::{ModelRegistry, PromotionTransition, RegistryError};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::PromotionError;

/// Evaluations per call before a moving production version is surfaced.
const MAX_PROMOTE_ATTEMPTS: u32 = 3;

/// Result of one evaluate-and-maybe-promote pass.
#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    pub model_name: String,
    /// Candidate as stored after the pass (PRODUCTION if promoted, else CANDIDATE).
    pub candidate: ModelVersion,
    pub decision: PromotionDecision,
    /// Present only when the decision was PROMOTE.
    pub transition: Option<PromotionTransition>,
    pub report_path: Option<PathBuf>,
}

impl PromotionOutcome {
    pub fn promoted(&self) -> bool {
        self.transition.is_some()
    }

    pub fn archived_version(&self) -> Option<i64> {
        self.transition
            .as_ref()
            .and_then(|t| t.archived.as_ref())
            .map(|a| a.version)
    }
}

/// Runs the promotion workflow against an explicitly supplied registry.
///
/// Within one process, passes for the same model name are serialized by an
/// async mutex. Across processes, `promote` is a compare-and-swap on the
/// production version the decision was based on; a lost race re-reads
/// production and decides again.
pub struct PromotionOrchestrator<R: ModelRegistry> {
    registry: R,
    metric_key: String,
    decision_log: Option<Mutex<DecisionLogWriter>>,
    report_dir: Option<PathBuf>,
    /// One async mutex per model name; held for the whole read-decide-write pass.
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<R: ModelRegistry> PromotionOrchestrator<R> {
    pub fn new(registry: R, metric_key: impl Into<String>) -> Self {
        Self {
            registry,
            metric_key: metric_key.into(),
            decision_log: None,
            report_dir: None,
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Append every decision to `writer`.
    pub fn with_decision_log(mut self, writer: DecisionLogWriter) -> Self {
        self.decision_log = Some(Mutex::new(writer));
        self
    }

    /// Write `<dir>/<model_name>/promotion_report.json` after each decision.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn metric_key(&self) -> &str {
        &self.metric_key
    }

    /// Register a CANDIDATE version from a recorded training run, using the
    /// run's metric under the configured key.
    pub async fn register_from_run(
        &self,
        model_name: &str,
        run_id: &str,
    ) -> Result<ModelVersion, PromotionError> {
        match self
            .registry
            .register_version(model_name, run_id, &self.metric_key)
            .await
        {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(model_name, run_id, error = %e, "refusing to register candidate");
                Err(e.into())
            }
        }
    }

    /// Compare `version` against the current production version and promote
    /// it when the policy says so.
    ///
    /// Any failure to read the production version is returned as-is; the
    /// policy never runs on a guessed production metric.
    pub async fn evaluate_and_promote(
        &self,
        model_name: &str,
        version: i64,
    ) -> Result<PromotionOutcome, PromotionError> {
        let report_dir = self.report_dir_for(model_name)?;

        let lock = self.name_lock(model_name).await;
        let _guard = lock.lock().await;

        let candidate = self.registry.get_version(model_name, version).await?;
        if candidate.stage != ModelStage::Candidate {
            return Err(RegistryError::InvalidTransition {
                model_name: model_name.to_string(),
                version,
                from: candidate.stage,
                to: ModelStage::Production,
            }
            .into());
        }
        let candidate_metric = self.comparable(candidate.clone()).await?.metric;

        let mut attempt = 1;
        let (decision, transition) = loop {
            let production = match self.registry.production_version(model_name).await? {
                Some(p) => Some(self.comparable(p).await?),
                None => None,
            };
            let decision =
                evaluate_candidate(&self.metric_key, candidate_metric, production.as_ref());
            if !decision.decision.is_promote() {
                break (decision, None);
            }

            let expected = production.as_ref().map(|p| p.version);
            match self.registry.promote(model_name, version, expected).await {
                Ok(t) => break (decision, Some(t)),
                Err(e) if e.is_retryable() && attempt < MAX_PROMOTE_ATTEMPTS => {
                    warn!(
                        model_name,
                        version,
                        attempt,
                        error = %e,
                        "production moved during evaluation; deciding again"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let candidate = match &transition {
            Some(t) => t.promoted.clone(),
            None => candidate,
        };
        let archived_version = transition
            .as_ref()
            .and_then(|t| t.archived.as_ref())
            .map(|a| a.version);

        info!(
            model_name,
            version,
            metric_key = %self.metric_key,
            decision = decision.decision.as_str(),
            candidate_metric = decision.candidate_metric,
            production_metric = ?decision.production_metric,
            archived_version = ?archived_version,
            "promotion decision"
        );

        if let Some(log) = &self.decision_log {
            let mut w = log.lock().await;
            w.append(model_name, version, &decision, archived_version)
                .map_err(PromotionError::DecisionLog)?;
        }

        let report_path = match report_dir {
            Some(dir) => {
                let report = PromotionReport {
                    model_name: model_name.to_string(),
                    candidate_version: version,
                    decision: decision.clone(),
                    archived_version,
                    decided_at_utc: Utc::now(),
                };
                Some(write_promotion_report_json(&dir, &report)?)
            }
            None => None,
        };

        Ok(PromotionOutcome {
            model_name: model_name.to_string(),
            candidate,
            decision,
            transition,
            report_path,
        })
    }

    /// Register the run's model as a candidate, then evaluate and maybe promote it.
    pub async fn run_pipeline(
        &self,
        model_name: &str,
        run_id: &str,
    ) -> Result<PromotionOutcome, PromotionError> {
        self.report_dir_for(model_name)?;
        let candidate = self.register_from_run(model_name, run_id).await?;
        self.evaluate_and_promote(model_name, candidate.version).await
    }

    /// `v` with its metric taken under the configured key. A version
    /// registered under another key is re-read from its training run.
    async fn comparable(&self, v: ModelVersion) -> Result<ModelVersion, RegistryError> {
        if v.metric_key == self.metric_key {
            return Ok(v);
        }
        let metric = self
            .registry
            .get_run(&v.run_id)
            .await?
            .finite_metric(&self.metric_key)?;
        Ok(ModelVersion {
            metric_key: self.metric_key.clone(),
            metric,
            ..v
        })
    }

    fn report_dir_for(&self, model_name: &str) -> Result<Option<PathBuf>, PromotionError> {
        let Some(dir) = &self.report_dir else {
            return Ok(None);
        };
        if !is_single_segment(model_name) {
            return Err(PromotionError::InvalidModelName(model_name.to_string()));
        }
        Ok(Some(dir.join(model_name)))
    }

    async fn name_lock(&self, model_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.name_locks.lock().await;
        Arc::clone(locks.entry(model_name.to_string()).or_default())
    }
}

/// True when `name` is exactly one normal path component.
fn is_single_segment(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut parts = Path::new(name).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(seg)), None) => seg.to_str() == Some(name),
        _ => false,
    }
}
