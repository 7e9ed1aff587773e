//! `mpg model register|promote|pipeline|status`.

use anyhow::Result;
use mpg_audit::DecisionLogWriter;
use mpg_config::ConfigUse;
use mpg_db::PgRegistry;
use mpg_registry::ModelRegistry;
use mpg_runtime::{PromotionOrchestrator, PromotionOutcome};

use super::CliConfig;

async fn orchestrator(cfg: &CliConfig) -> Result<PromotionOrchestrator<PgRegistry>> {
    let s = &cfg.settings;
    let registry = PgRegistry::new(cfg.connect().await?);
    let mut o = PromotionOrchestrator::new(registry, s.metric_key.clone())
        .with_decision_log(DecisionLogWriter::resume(&s.audit_path, s.hash_chain)?);
    if let Some(dir) = &s.report_dir {
        o = o.with_report_dir(dir);
    }
    Ok(o)
}

pub async fn register(cfg: &CliConfig, model: Option<String>, run_id: &str) -> Result<()> {
    cfg.check_unused(ConfigUse::Pipeline)?;
    let model_name = cfg.model_name(model)?;

    let o = orchestrator(cfg).await?;
    let v = o.register_from_run(&model_name, run_id).await?;

    println!("model_name={}", v.model_name);
    println!("version={}", v.version);
    println!("stage={}", v.stage);
    println!("{}={}", o.metric_key(), v.metric);
    Ok(())
}

pub async fn promote(cfg: &CliConfig, model: Option<String>, version: i64) -> Result<()> {
    cfg.check_unused(ConfigUse::Pipeline)?;
    let model_name = cfg.model_name(model)?;

    let o = orchestrator(cfg).await?;
    let outcome = o.evaluate_and_promote(&model_name, version).await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn pipeline(cfg: &CliConfig, model: Option<String>, run_id: &str) -> Result<()> {
    cfg.check_unused(ConfigUse::Pipeline)?;
    let model_name = cfg.model_name(model)?;

    let o = orchestrator(cfg).await?;
    let outcome = o.run_pipeline(&model_name, run_id).await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn status(cfg: &CliConfig, model: Option<String>) -> Result<()> {
    cfg.check_unused(ConfigUse::Inspect)?;
    let model_name = cfg.model_name(model)?;

    let registry = PgRegistry::new(cfg.connect().await?);
    let production = registry.production_version(&model_name).await?;
    let versions = registry.list_versions(&model_name).await?;

    println!("model_name={}", model_name);
    println!(
        "production_version={}",
        production
            .as_ref()
            .map(|v| v.version.to_string())
            .unwrap_or_default()
    );
    println!("versions={}", versions.len());
    for v in &versions {
        println!(
            "version={} stage={} metric={} run_id={} stage_updated_at_utc={}",
            v.version,
            v.stage,
            v.metric,
            v.run_id,
            v.stage_updated_at_utc.to_rfc3339()
        );
    }
    Ok(())
}

fn print_outcome(o: &PromotionOutcome) {
    let d = &o.decision;
    println!("model_name={}", o.model_name);
    println!("version={}", o.candidate.version);
    println!("decision={}", d.decision.as_str());
    println!("stage={}", o.candidate.stage);
    println!("candidate_metric={}", d.candidate_metric);
    println!(
        "production_metric={}",
        d.production_metric.map(|m| m.to_string()).unwrap_or_default()
    );
    println!(
        "archived_version={}",
        o.archived_version().map(|v| v.to_string()).unwrap_or_default()
    );
    for r in &d.reasons {
        println!("reason={}", r);
    }
    if let Some(p) = &o.report_path {
        println!("report_path={}", p.display());
    }
}
