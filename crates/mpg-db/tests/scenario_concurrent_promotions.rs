use std::collections::BTreeMap;

use chrono::Utc;
use mpg_promotion::ModelStage;
use mpg_registry::{ModelRegistry, RegistryError, TrainingRun};
use uuid::Uuid;

/// Many concurrent promote() calls for one model name must leave exactly one
/// PRODUCTION version.
///
/// DB-backed test. Skips if MPG_DATABASE_URL is not set.
#[tokio::test]
async fn concurrent_promotions_keep_single_production() -> anyhow::Result<()> {
    let url = match std::env::var(mpg_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MPG_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = mpg_db::connect(&url).await?;
    mpg_db::migrate(&pool).await?;
    let reg = mpg_db::PgRegistry::new(pool);

    let model = format!("RACE_{}", Uuid::new_v4().simple());
    let run_id = format!("run_{}", Uuid::new_v4().simple());
    reg.record_run(&TrainingRun {
        run_id: run_id.clone(),
        experiment: "race".to_string(),
        params: BTreeMap::new(),
        metrics: BTreeMap::from([("accuracy".to_string(), 0.5)]),
        started_at_utc: Utc::now(),
    })
    .await?;

    let mut versions = Vec::new();
    for _ in 0..8 {
        versions.push(reg.register_version(&model, &run_id, "accuracy").await?.version);
    }

    let mut handles = Vec::new();
    for v in versions {
        let reg = reg.clone();
        let model = model.clone();
        handles.push(tokio::spawn(async move {
            let current = reg.production_version(&model).await?.map(|p| p.version);
            reg.promote(&model, v, current).await
        }));
    }
    for h in handles {
        if let Err(e) = h.await? {
            assert!(
                e.is_retryable() || matches!(e, RegistryError::InvalidTransition { .. }),
                "unexpected: {e}"
            );
        }
    }

    let production = reg
        .list_versions(&model)
        .await?
        .into_iter()
        .filter(|v| v.stage == ModelStage::Production)
        .count();
    assert_eq!(production, 1);
    Ok(())
}
