//! Postgres-backed [`ModelRegistry`].
//!
//! Writers for one model name are serialized with a transaction-scoped
//! advisory lock keyed on `hashtext(model_name)`. The partial unique index
//! `uq_model_single_production` is the backstop: even a writer that skipped
//! the lock cannot commit a second PRODUCTION row.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mpg_promotion::{ModelStage, ModelVersion};
use mpg_registry::{
    single_production, ModelRegistry, PromotionTransition, RegistryError, StageTransition,
    TrainingRun,
};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};

const UQ_SINGLE_PRODUCTION: &str = "uq_model_single_production";

#[derive(Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin_locked(
        &self,
        model_name: &str,
    ) -> Result<Transaction<'_, Postgres>, RegistryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| unavailable("begin transaction", e))?;

        sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
            .bind(model_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("advisory lock", e))?;

        Ok(tx)
    }
}

#[async_trait]
impl ModelRegistry for PgRegistry {
    async fn record_run(&self, run: &TrainingRun) -> Result<(), RegistryError> {
        run.check_metrics_finite()?;

        let params = serde_json::to_value(&run.params)
            .map_err(|e| RegistryError::RegistryUnavailable(format!("encode params: {e}")))?;
        let metrics = serde_json::to_value(&run.metrics)
            .map_err(|e| RegistryError::RegistryUnavailable(format!("encode metrics: {e}")))?;

        sqlx::query(
            r#"
            insert into training_runs (run_id, experiment, params, metrics, started_at_utc)
            values ($1, $2, $3, $4, $5)
            on conflict (run_id) do update
              set experiment = excluded.experiment,
                  params = excluded.params,
                  metrics = excluded.metrics,
                  started_at_utc = excluded.started_at_utc
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.experiment)
        .bind(&params)
        .bind(&metrics)
        .bind(run.started_at_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("record_run", e))?;

        debug!(run_id = %run.run_id, experiment = %run.experiment, "training run recorded");
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<TrainingRun, RegistryError> {
        let row = sqlx::query(
            r#"
            select run_id, experiment, params, metrics, started_at_utc
            from training_runs
            where run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("get_run", e))?
        .ok_or_else(|| RegistryError::UnknownRun(run_id.to_string()))?;

        row_to_run(&row)
    }

    async fn register_version(
        &self,
        model_name: &str,
        run_id: &str,
        metric_key: &str,
    ) -> Result<ModelVersion, RegistryError> {
        let mut tx = self.begin_locked(model_name).await?;

        let run_row = sqlx::query(
            r#"
            select run_id, experiment, params, metrics, started_at_utc
            from training_runs
            where run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| unavailable("register_version run lookup", e))?
        .ok_or_else(|| RegistryError::UnknownRun(run_id.to_string()))?;
        let metric = row_to_run(&run_row)?.finite_metric(metric_key)?;

        let now = Utc::now();
        let row = sqlx::query(
            r#"
            insert into model_versions (
              model_name, version, run_id, metric_key, metric, stage,
              created_at_utc, stage_updated_at_utc
            )
            select $1, coalesce(max(version), 0) + 1, $2, $3, $4, 'CANDIDATE', $5, $5
            from model_versions
            where model_name = $1
            returning model_name, version, run_id, metric_key, metric, stage, created_at_utc, stage_updated_at_utc
            "#,
        )
        .bind(model_name)
        .bind(run_id)
        .bind(metric_key)
        .bind(metric)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unavailable("register_version insert", e))?;

        let mv = row_to_version(&row)?;
        tx.commit()
            .await
            .map_err(|e| unavailable("register_version commit", e))?;

        info!(
            model_name,
            version = mv.version,
            run_id,
            metric_key,
            metric,
            "model version registered"
        );
        Ok(mv)
    }

    async fn get_version(
        &self,
        model_name: &str,
        version: i64,
    ) -> Result<ModelVersion, RegistryError> {
        let row = sqlx::query(
            r#"
            select model_name, version, run_id, metric_key, metric, stage, created_at_utc, stage_updated_at_utc
            from model_versions
            where model_name = $1 and version = $2
            "#,
        )
        .bind(model_name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("get_version", e))?
        .ok_or_else(|| RegistryError::UnknownVersion {
            model_name: model_name.to_string(),
            version,
        })?;

        row_to_version(&row)
    }

    async fn list_versions(&self, model_name: &str) -> Result<Vec<ModelVersion>, RegistryError> {
        let rows = sqlx::query(
            r#"
            select model_name, version, run_id, metric_key, metric, stage, created_at_utc, stage_updated_at_utc
            from model_versions
            where model_name = $1
            order by version asc
            "#,
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("list_versions", e))?;

        rows.iter().map(row_to_version).collect()
    }

    async fn production_version(
        &self,
        model_name: &str,
    ) -> Result<Option<ModelVersion>, RegistryError> {
        let rows = sqlx::query(
            r#"
            select model_name, version, run_id, metric_key, metric, stage, created_at_utc, stage_updated_at_utc
            from model_versions
            where model_name = $1 and stage = 'PRODUCTION'
            "#,
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("production_version", e))?;

        let versions = rows
            .iter()
            .map(row_to_version)
            .collect::<Result<Vec<_>, _>>()?;
        single_production(model_name, versions)
    }

    async fn promote(
        &self,
        model_name: &str,
        version: i64,
        expected_production: Option<i64>,
    ) -> Result<PromotionTransition, RegistryError> {
        let mut tx = self.begin_locked(model_name).await?;

        let rows = sqlx::query(
            r#"
            select model_name, version, run_id, metric_key, metric, stage, created_at_utc, stage_updated_at_utc
            from model_versions
            where model_name = $1 and (version = $2 or stage = 'PRODUCTION')
            for update
            "#,
        )
        .bind(model_name)
        .bind(version)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| unavailable("promote select", e))?;

        let locked = rows
            .iter()
            .map(row_to_version)
            .collect::<Result<Vec<_>, _>>()?;

        let target = locked
            .iter()
            .find(|v| v.version == version)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownVersion {
                model_name: model_name.to_string(),
                version,
            })?;

        if !target.stage.can_transition_to(ModelStage::Production) {
            return Err(RegistryError::InvalidTransition {
                model_name: model_name.to_string(),
                version,
                from: target.stage,
                to: ModelStage::Production,
            });
        }

        let previous = single_production(model_name, locked)?;
        let actual = previous.as_ref().map(|p| p.version);
        if actual != expected_production {
            debug!(model_name, version, ?expected_production, ?actual, "production changed");
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
            let row = sqlx::query(
                r#"
                update model_versions
                set stage = 'ARCHIVED', stage_updated_at_utc = $3
                where model_name = $1 and version = $2
                returning model_name, version, run_id, metric_key, metric, stage, created_at_utc, stage_updated_at_utc
                "#,
            )
            .bind(model_name)
            .bind(prev.version)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| unavailable("promote archive", e))?;

            archived = Some(row_to_version(&row)?);
            transitions.push(StageTransition {
                model_name: model_name.to_string(),
                version: prev.version,
                from_stage: ModelStage::Production,
                to_stage: ModelStage::Archived,
                ts_utc: now,
            });
        }

        let row = sqlx::query(
            r#"
            update model_versions
            set stage = 'PRODUCTION', stage_updated_at_utc = $3
            where model_name = $1 and version = $2
            returning model_name, version, run_id, metric_key, metric, stage, created_at_utc, stage_updated_at_utc
            "#,
        )
        .bind(model_name)
        .bind(version)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| promote_error(model_name, e))?;

        let promoted = row_to_version(&row)?;
        transitions.push(StageTransition {
            model_name: model_name.to_string(),
            version,
            from_stage: target.stage,
            to_stage: ModelStage::Production,
            ts_utc: now,
        });

        for t in &transitions {
            sqlx::query(
                r#"
                insert into stage_transitions (model_name, version, from_stage, to_stage, ts_utc)
                values ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&t.model_name)
            .bind(t.version)
            .bind(t.from_stage.as_str())
            .bind(t.to_stage.as_str())
            .bind(t.ts_utc)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("promote transition insert", e))?;
        }

        tx.commit().await.map_err(|e| promote_error(model_name, e))?;

        info!(
            model_name,
            version,
            archived_version = archived.as_ref().map(|a| a.version),
            "model version promoted to PRODUCTION"
        );

        Ok(PromotionTransition {
            promoted,
            archived,
            transitions,
        })
    }

    async fn transitions(&self, model_name: &str) -> Result<Vec<StageTransition>, RegistryError> {
        let rows = sqlx::query(
            r#"
            select model_name, version, from_stage, to_stage, ts_utc
            from stage_transitions
            where model_name = $1
            order by transition_id asc
            "#,
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("transitions", e))?;

        rows.iter()
            .map(|row| -> Result<StageTransition, RegistryError> {
                Ok(StageTransition {
                    model_name: get(row, "model_name")?,
                    version: get(row, "version")?,
                    from_stage: parse_stage(&get::<String>(row, "from_stage")?)?,
                    to_stage: parse_stage(&get::<String>(row, "to_stage")?)?,
                    ts_utc: get(row, "ts_utc")?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_version(row: &PgRow) -> Result<ModelVersion, RegistryError> {
    Ok(ModelVersion {
        model_name: get(row, "model_name")?,
        version: get(row, "version")?,
        run_id: get(row, "run_id")?,
        metric_key: get(row, "metric_key")?,
        metric: get(row, "metric")?,
        stage: parse_stage(&get::<String>(row, "stage")?)?,
        created_at_utc: get::<DateTime<Utc>>(row, "created_at_utc")?,
        stage_updated_at_utc: get::<DateTime<Utc>>(row, "stage_updated_at_utc")?,
    })
}

fn row_to_run(row: &PgRow) -> Result<TrainingRun, RegistryError> {
    let params: Value = get(row, "params")?;
    let metrics: Value = get(row, "metrics")?;
    let run_id: String = get(row, "run_id")?;

    let params: BTreeMap<String, String> = serde_json::from_value(params).map_err(|e| {
        RegistryError::RegistryUnavailable(format!("decode params for run {run_id}: {e}"))
    })?;
    let metrics: BTreeMap<String, f64> = serde_json::from_value(metrics).map_err(|e| {
        RegistryError::RegistryUnavailable(format!("decode metrics for run {run_id}: {e}"))
    })?;

    Ok(TrainingRun {
        experiment: get(row, "experiment")?,
        started_at_utc: get(row, "started_at_utc")?,
        run_id,
        params,
        metrics,
    })
}

fn get<'r, T>(row: &'r PgRow, col: &str) -> Result<T, RegistryError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(col)
        .map_err(|e| RegistryError::RegistryUnavailable(format!("decode column {col}: {e}")))
}

fn parse_stage(s: &str) -> Result<ModelStage, RegistryError> {
    s.parse()
        .map_err(|e| RegistryError::RegistryUnavailable(format!("corrupt stage value: {e}")))
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn unavailable(op: &str, e: sqlx::Error) -> RegistryError {
    warn!(op, error = %e, "registry query failed");
    RegistryError::RegistryUnavailable(format!("{op}: {e}"))
}

/// The single-production index rejected the write: someone else won.
fn promote_error(model_name: &str, e: sqlx::Error) -> RegistryError {
    if is_unique_constraint_violation(&e, UQ_SINGLE_PRODUCTION) {
        warn!(model_name, "concurrent promotion rejected by {UQ_SINGLE_PRODUCTION}");
        return RegistryError::ConcurrentPromotion {
            model_name: model_name.to_string(),
        };
    }
    unavailable("promote", e)
}

fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}
