use std::collections::BTreeMap;

use chrono::Utc;
use mpg_promotion::ModelStage;
use mpg_registry::{ModelRegistry, RegistryError, TrainingRun};
use uuid::Uuid;

/// Ensures promote() archives the previous PRODUCTION version atomically and
/// that the schema itself refuses a second PRODUCTION row per model name.
///
/// DB-backed test. Skips if MPG_DATABASE_URL is not set.
#[tokio::test]
async fn promote_archives_and_index_rejects_second_production() -> anyhow::Result<()> {
    let url = match std::env::var(mpg_db::ENV_DB_URL) {
        Ok(v) => v,
        Err(_) => {
            eprintln!("SKIP: MPG_DATABASE_URL not set");
            return Ok(());
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await?;
    mpg_db::migrate(&pool).await?;
    let reg = mpg_db::PgRegistry::new(pool.clone());

    // Unique model name so the test never collides with leftover rows.
    let model = format!("TEST_MODEL_{}", Uuid::new_v4().simple());
    let run_id = format!("run_{}", Uuid::new_v4().simple());

    reg.record_run(&TrainingRun {
        run_id: run_id.clone(),
        experiment: "CI_CD_Automation_Demo".to_string(),
        params: BTreeMap::from([("n_estimators".to_string(), "50".to_string())]),
        metrics: BTreeMap::from([("accuracy".to_string(), 0.75), ("f1".to_string(), 0.5)]),
        started_at_utc: Utc::now(),
    })
    .await?;

    let fetched = reg.get_run(&run_id).await?;
    assert_eq!(fetched.metric("accuracy")?, 0.75);

    assert!(reg.production_version(&model).await?.is_none());

    let v1 = reg.register_version(&model, &run_id, "accuracy").await?;
    let v2 = reg.register_version(&model, &run_id, "f1").await?;
    assert_eq!((v1.version, v2.version), (1, 2));
    assert_eq!((v1.metric_key.as_str(), v1.metric), ("accuracy", 0.75));
    assert_eq!((v2.metric_key.as_str(), v2.metric), ("f1", 0.5));

    let err = reg.register_version(&model, &run_id, "auc").await.unwrap_err();
    assert!(matches!(err, RegistryError::MetricMissing { .. }), "{err}");

    reg.promote(&model, v1.version, None).await?;

    // A caller that read "no production" before v1 was promoted is refused.
    let err = reg.promote(&model, v2.version, None).await.unwrap_err();
    assert!(
        matches!(err, RegistryError::ProductionChanged { actual: Some(1), .. }),
        "{err}"
    );

    let t = reg.promote(&model, v2.version, Some(v1.version)).await?;
    assert_eq!(t.archived.map(|a| a.version), Some(v1.version));

    let versions = reg.list_versions(&model).await?;
    let stages: Vec<ModelStage> = versions.iter().map(|v| v.stage).collect();
    assert_eq!(stages, vec![ModelStage::Archived, ModelStage::Production]);

    // The refused promote left no transition behind.
    let history = reg.transitions(&model).await?;
    assert_eq!(history.len(), 3);

    // Re-promoting an archived version is an invalid transition.
    let err = reg
        .promote(&model, v1.version, Some(v2.version))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidTransition { .. }), "{err}");

    // Bypassing promote(): the partial unique index must refuse the write.
    let res = sqlx::query(
        "update model_versions set stage = 'PRODUCTION' where model_name = $1 and version = $2",
    )
    .bind(&model)
    .bind(v1.version)
    .execute(&pool)
    .await;
    let err = res.expect_err("second PRODUCTION row must be rejected");
    let constraint = match &err {
        sqlx::Error::Database(db) => db.constraint().map(str::to_string),
        _ => None,
    };
    assert_eq!(constraint.as_deref(), Some("uq_model_single_production"));

    Ok(())
}

/// NaN metrics never reach the JSON column, where they would turn into null
/// and make the run unreadable.
///
/// DB-backed test. Skips if MPG_DATABASE_URL is not set.
#[tokio::test]
async fn non_finite_run_metrics_are_refused() -> anyhow::Result<()> {
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

    let run_id = format!("run_{}", Uuid::new_v4().simple());
    let err = reg
        .record_run(&TrainingRun {
            run_id: run_id.clone(),
            experiment: "nan".to_string(),
            params: BTreeMap::new(),
            metrics: BTreeMap::from([("accuracy".to_string(), f64::NAN)]),
            started_at_utc: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NonFiniteMetric { .. }), "{err}");
    assert!(matches!(
        reg.get_run(&run_id).await.unwrap_err(),
        RegistryError::UnknownRun(_)
    ));
    Ok(())
}
