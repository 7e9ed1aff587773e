use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mpg_promotion::{check_metric_finite, ModelStage, ModelVersion};
use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// A finished training run as recorded by the tracking side of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub experiment: String,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub started_at_utc: DateTime<Utc>,
}

impl TrainingRun {
    /// Look up a metric by key. A missing key is an error, not zero.
    pub fn metric(&self, metric_key: &str) -> Result<f64, RegistryError> {
        self.metrics
            .get(metric_key)
            .copied()
            .ok_or_else(|| RegistryError::MetricMissing {
                run_id: self.run_id.clone(),
                metric_key: metric_key.to_string(),
            })
    }

    /// [`TrainingRun::metric`], refusing NaN and infinities.
    pub fn finite_metric(&self, metric_key: &str) -> Result<f64, RegistryError> {
        let value = self.metric(metric_key)?;
        match check_metric_finite(metric_key, value) {
            None => Ok(value),
            Some(_) => Err(self.non_finite(metric_key, value)),
        }
    }

    /// Every recorded metric must be finite; JSON storage cannot hold NaN.
    pub fn check_metrics_finite(&self) -> Result<(), RegistryError> {
        match self.metrics.iter().find(|(_, v)| !v.is_finite()) {
            Some((k, v)) => Err(self.non_finite(k, *v)),
            None => Ok(()),
        }
    }

    fn non_finite(&self, metric_key: &str, value: f64) -> RegistryError {
        RegistryError::NonFiniteMetric {
            run_id: self.run_id.clone(),
            metric_key: metric_key.to_string(),
            value,
        }
    }
}

/// Record of one stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub model_name: String,
    pub version: i64,
    pub from_stage: ModelStage,
    pub to_stage: ModelStage,
    pub ts_utc: DateTime<Utc>,
}

/// Result of a successful `promote`.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionTransition {
    /// The version now in PRODUCTION.
    pub promoted: ModelVersion,
    /// The version moved PRODUCTION -> ARCHIVED, if one existed.
    pub archived: Option<ModelVersion>,
    /// Transitions applied, archive first.
    pub transitions: Vec<StageTransition>,
}

/// Reduce a set of versions to the single production version, if any.
///
/// Two or more production versions is an invariant violation and is
/// reported as [`RegistryError::AmbiguousMultipleProduction`].
pub fn single_production<I>(
    model_name: &str,
    versions: I,
) -> Result<Option<ModelVersion>, RegistryError>
where
    I: IntoIterator<Item = ModelVersion>,
{
    let mut prod: Vec<ModelVersion> = versions
        .into_iter()
        .filter(|v| v.stage == ModelStage::Production)
        .collect();

    match prod.len() {
        0 => Ok(None),
        1 => Ok(prod.pop()),
        _ => {
            let mut ids: Vec<i64> = prod.iter().map(|v| v.version).collect();
            ids.sort_unstable();
            Err(RegistryError::AmbiguousMultipleProduction {
                model_name: model_name.to_string(),
                versions: ids,
            })
        }
    }
}
