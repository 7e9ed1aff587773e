//! `mpg run record`.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use mpg_config::ConfigUse;
use mpg_db::PgRegistry;
use mpg_registry::{ModelRegistry, TrainingRun};
use uuid::Uuid;

use super::CliConfig;

/// Param under which the active config hash is stored, unless the caller set it.
const CONFIG_HASH_PARAM: &str = "config_hash";

pub async fn record(
    cfg: &CliConfig,
    experiment: String,
    metrics: &[String],
    params: &[String],
    run_id: Option<String>,
) -> Result<()> {
    cfg.check_unused(ConfigUse::Inspect)?;

    let mut metric_map = BTreeMap::new();
    for raw in metrics {
        let (k, v) = split_kv(raw).with_context(|| format!("invalid --metric {raw:?}"))?;
        let value: f64 = v
            .parse()
            .with_context(|| format!("metric {k} must be a number, got {v:?}"))?;
        metric_map.insert(k.to_string(), value);
    }

    let mut param_map = BTreeMap::new();
    for raw in params {
        let (k, v) = split_kv(raw).with_context(|| format!("invalid --param {raw:?}"))?;
        param_map.insert(k.to_string(), v.to_string());
    }
    if let Some(hash) = cfg.config_hash() {
        param_map
            .entry(CONFIG_HASH_PARAM.to_string())
            .or_insert_with(|| hash.to_string());
    }

    let run = TrainingRun {
        run_id: run_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        experiment,
        params: param_map,
        metrics: metric_map,
        started_at_utc: Utc::now(),
    };
    run.check_metrics_finite()?;

    let registry = PgRegistry::new(cfg.connect().await?);
    registry.record_run(&run).await?;

    println!("run_id={}", run.run_id);
    println!("experiment={}", run.experiment);
    for (k, v) in &run.metrics {
        println!("metric.{}={}", k, v);
    }
    Ok(())
}

fn split_kv(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim(), v.trim())),
        _ => bail!("expected key=value"),
    }
}
