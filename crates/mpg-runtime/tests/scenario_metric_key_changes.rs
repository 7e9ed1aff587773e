//! Versions remember the metric they were registered under.
//!
//! GREEN when:
//! - Evaluating under a different key compares both sides under that key,
//!   re-reading the production version's training run.
//! - A production run without the key is MetricMissing, never a promotion.

mod common;

use std::sync::Arc;

use common::{run_with, MODEL};
use mpg_promotion::{ModelStage, PromoteDecision};
use mpg_registry::{InMemoryRegistry, ModelRegistry, RegistryError};
use mpg_runtime::PromotionOrchestrator;

#[tokio::test]
async fn switching_metric_key_compares_like_with_like() {
    let reg = Arc::new(InMemoryRegistry::new());
    reg.record_run(&run_with("r1", &[("accuracy", 0.9), ("f1", 0.5)]))
        .await
        .unwrap();
    reg.record_run(&run_with("r2", &[("accuracy", 0.45), ("f1", 0.6)]))
        .await
        .unwrap();

    let by_accuracy = PromotionOrchestrator::new(Arc::clone(&reg), "accuracy");
    let first = by_accuracy.run_pipeline(MODEL, "r1").await.unwrap();
    assert!(first.promoted());
    assert_eq!(first.candidate.metric_key, "accuracy");

    let by_f1 = PromotionOrchestrator::new(Arc::clone(&reg), "f1");
    let second = by_f1.run_pipeline(MODEL, "r2").await.unwrap();

    assert_eq!(second.candidate.metric_key, "f1");
    assert_eq!(second.decision.decision, PromoteDecision::Promote);
    assert_eq!(second.decision.candidate_metric, 0.6);
    assert_eq!(second.decision.production_metric, Some(0.5));
    assert!(
        second.decision.reasons[0].contains("f1 0.600000 > production v1 0.500000"),
        "got: {:?}",
        second.decision.reasons
    );
}

#[tokio::test]
async fn production_without_the_key_blocks_promotion() {
    let reg = Arc::new(InMemoryRegistry::new());
    reg.record_run(&run_with("prod", &[("accuracy", 0.9)]))
        .await
        .unwrap();
    reg.record_run(&run_with("cand", &[("accuracy", 0.1), ("auc", 0.99)]))
        .await
        .unwrap();

    PromotionOrchestrator::new(Arc::clone(&reg), "accuracy")
        .run_pipeline(MODEL, "prod")
        .await
        .unwrap();

    let by_auc = PromotionOrchestrator::new(Arc::clone(&reg), "auc");
    let err = by_auc.run_pipeline(MODEL, "cand").await.unwrap_err();
    match err.registry() {
        Some(RegistryError::MetricMissing { run_id, metric_key }) => {
            assert_eq!((run_id.as_str(), metric_key.as_str()), ("prod", "auc"));
        }
        other => panic!("expected MetricMissing, got {other:?}"),
    }

    let stages: Vec<ModelStage> = reg
        .list_versions(MODEL)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.stage)
        .collect();
    assert_eq!(stages, vec![ModelStage::Production, ModelStage::Candidate]);
}
