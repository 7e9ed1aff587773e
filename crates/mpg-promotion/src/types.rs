use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Deployment stage of a registered model version.
///
/// Allowed transitions:
/// - `Candidate -> Production` (promotion)
/// - `Production -> Archived` (displaced by a promotion)
///
/// `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStage {
    Candidate,
    Production,
    Archived,
}

impl ModelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStage::Candidate => "CANDIDATE",
            ModelStage::Production => "PRODUCTION",
            ModelStage::Archived => "ARCHIVED",
        }
    }

    pub fn can_transition_to(&self, to: ModelStage) -> bool {
        matches!(
            (self, to),
            (ModelStage::Candidate, ModelStage::Production)
                | (ModelStage::Production, ModelStage::Archived)
        )
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by [`ModelStage::from_str`] for an unrecognised stage string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageParseError(pub String);

impl fmt::Display for StageParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid model stage: {}", self.0)
    }
}

impl std::error::Error for StageParseError {}

impl FromStr for ModelStage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CANDIDATE" => Ok(ModelStage::Candidate),
            "PRODUCTION" => Ok(ModelStage::Production),
            "ARCHIVED" => Ok(ModelStage::Archived),
            other => Err(StageParseError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Model version
// ---------------------------------------------------------------------------

/// One registered version of a named model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_name: String,
    /// Per-name version number, starting at 1.
    pub version: i64,
    /// Training run that produced this version.
    pub run_id: String,
    /// Run metric the version was registered under.
    pub metric_key: String,
    /// Value of `metric_key` on the run (higher is better).
    pub metric: f64,
    pub stage: ModelStage,
    pub created_at_utc: DateTime<Utc>,
    pub stage_updated_at_utc: DateTime<Utc>,
}

impl ModelVersion {
    pub fn is_production(&self) -> bool {
        self.stage == ModelStage::Production
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of the promotion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromoteDecision {
    Promote,
    Reject,
}

impl PromoteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoteDecision::Promote => "PROMOTE",
            PromoteDecision::Reject => "REJECT",
        }
    }

    pub fn is_promote(&self) -> bool {
        *self == PromoteDecision::Promote
    }
}

/// Policy result for a single candidate, with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub decision: PromoteDecision,
    pub metric_key: String,
    pub candidate_metric: f64,
    /// Metric of the production version at decision time (None = no production version).
    pub production_metric: Option<f64>,
    pub production_version: Option<i64>,
    /// Human-readable explanation, stable-ordered.
    pub reasons: Vec<String>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Full promotion report artifact (serializable to JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReport {
    pub model_name: String,
    pub candidate_version: i64,
    pub decision: PromotionDecision,
    /// Version archived by this promotion, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_version: Option<i64>,
    pub decided_at_utc: DateTime<Utc>,
}

/// Write the report as pretty-printed JSON to `out_dir/promotion_report.json`.
/// Returns the path written.
pub fn write_promotion_report_json(
    out_dir: &Path,
    report: &PromotionReport,
) -> io::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join("promotion_report.json");
    let json = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
    std::fs::write(&path, json)?;
    Ok(path)
}
