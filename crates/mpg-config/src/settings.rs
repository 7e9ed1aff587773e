use std::path::PathBuf;

use anyhow::{bail, Result};
use serde_json::Value;

pub const DEFAULT_METRIC_KEY: &str = "accuracy";
pub const DEFAULT_AUDIT_PATH: &str = "exports/promotion_audit.jsonl";
pub const DEFAULT_DATABASE_URL_ENV: &str = "MPG_DATABASE_URL";

/// Typed view of the keys the promotion pipeline reads.
///
/// Absent keys take defaults; present keys with the wrong type are errors.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionSettings {
    /// `/registry/model_name`: CLI `--model` overrides.
    pub model_name: Option<String>,
    /// `/registry/database_url_env`: name of the env var holding the URL.
    pub database_url_env: String,
    /// `/promotion/metric_key`: run metric compared by the policy.
    pub metric_key: String,
    /// `/promotion/report_dir`: where promotion_report.json is written, if set.
    pub report_dir: Option<PathBuf>,
    /// `/audit/path`
    pub audit_path: PathBuf,
    /// `/audit/hash_chain`
    pub hash_chain: bool,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            model_name: None,
            database_url_env: DEFAULT_DATABASE_URL_ENV.to_string(),
            metric_key: DEFAULT_METRIC_KEY.to_string(),
            report_dir: None,
            audit_path: PathBuf::from(DEFAULT_AUDIT_PATH),
            hash_chain: true,
        }
    }
}

impl PromotionSettings {
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let d = Self::default();

        let metric_key = opt_str(config, "/promotion/metric_key")?.unwrap_or(d.metric_key);
        if metric_key.trim().is_empty() {
            bail!("CONFIG_INVALID /promotion/metric_key must not be empty");
        }

        Ok(Self {
            model_name: opt_str(config, "/registry/model_name")?,
            database_url_env: opt_str(config, "/registry/database_url_env")?
                .unwrap_or(d.database_url_env),
            metric_key,
            report_dir: opt_str(config, "/promotion/report_dir")?.map(PathBuf::from),
            audit_path: opt_str(config, "/audit/path")?
                .map(PathBuf::from)
                .unwrap_or(d.audit_path),
            hash_chain: opt_bool(config, "/audit/hash_chain")?.unwrap_or(d.hash_chain),
        })
    }
}

fn opt_str(config: &Value, ptr: &str) -> Result<Option<String>> {
    match config.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => bail!("CONFIG_INVALID {ptr} must be a string, got {other}"),
    }
}

fn opt_bool(config: &Value, ptr: &str) -> Result<Option<bool>> {
    match config.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => bail!("CONFIG_INVALID {ptr} must be a bool, got {other}"),
    }
}
