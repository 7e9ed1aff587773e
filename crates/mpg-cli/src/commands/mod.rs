//! Command handlers.

use anyhow::{bail, Context, Result};
use mpg_config::{ConfigUse, LoadedConfig, PromotionSettings, UnusedKeyPolicy};
use mpg_db::PgPool;
use tracing::warn;

pub mod model;
pub mod run;

/// Resolved `--config` layers plus the typed settings read from them.
pub struct CliConfig {
    pub loaded: Option<LoadedConfig>,
    pub settings: PromotionSettings,
    strict: bool,
}

impl CliConfig {
    /// No paths means defaults only.
    pub fn load(paths: &[String], strict: bool) -> Result<Self> {
        if paths.is_empty() {
            return Ok(Self {
                loaded: None,
                settings: PromotionSettings::default(),
                strict,
            });
        }

        let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
        let loaded = mpg_config::load_layered_yaml(&path_refs)?;
        let settings = loaded.settings()?;
        Ok(Self {
            loaded: Some(loaded),
            settings,
            strict,
        })
    }

    /// Report config keys `usage` does not read. Warns, or fails under
    /// `--strict-config`.
    pub fn check_unused(&self, usage: ConfigUse) -> Result<()> {
        let Some(loaded) = &self.loaded else {
            return Ok(());
        };
        let policy = if self.strict {
            UnusedKeyPolicy::Fail
        } else {
            UnusedKeyPolicy::Warn
        };
        let report = mpg_config::report_unused_keys(usage, &loaded.config_json, policy)?;
        if !report.is_clean() {
            warn!(
                usage = %report.usage,
                unused = ?report.unused_leaf_pointers,
                "config has unused keys"
            );
        }
        Ok(())
    }

    /// `--model` wins over `/registry/model_name`.
    pub fn model_name(&self, flag: Option<String>) -> Result<String> {
        match flag.or_else(|| self.settings.model_name.clone()) {
            Some(name) if !name.trim().is_empty() => Ok(name),
            _ => bail!("model name required: pass --model or set /registry/model_name"),
        }
    }

    pub async fn connect(&self) -> Result<PgPool> {
        mpg_db::connect_from_env_var(&self.settings.database_url_env).await
    }

    pub fn config_hash(&self) -> Option<&str> {
        self.loaded.as_ref().map(|l| l.config_hash.as_str())
    }
}

pub async fn db_status(cfg: &CliConfig) -> Result<()> {
    let pool = cfg.connect().await?;
    let s = mpg_db::status(&pool).await?;
    println!(
        "db_ok={} has_registry_tables={}",
        s.ok, s.has_registry_tables
    );
    Ok(())
}

pub async fn db_migrate(cfg: &CliConfig) -> Result<()> {
    let pool = cfg.connect().await?;
    mpg_db::migrate(&pool).await?;
    println!("migrations_applied=true");
    Ok(())
}

/// `mpg audit verify`: exits non-zero when the chain is broken.
pub fn audit_verify(cfg: &CliConfig, path: Option<String>) -> Result<()> {
    let path = path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| cfg.settings.audit_path.clone());

    match mpg_audit::verify_hash_chain(&path)
        .with_context(|| format!("verify decision log {}", path.display()))?
    {
        mpg_audit::VerifyResult::Valid { lines } => {
            println!("hash_chain_valid=true lines={} path={}", lines, path.display());
            Ok(())
        }
        mpg_audit::VerifyResult::Broken { line, reason } => {
            println!("hash_chain_valid=false line={} path={}", line, path.display());
            bail!("decision log hash chain broken at line {}: {}", line, reason)
        }
    }
}
