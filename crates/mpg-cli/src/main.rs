use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mpg")]
#[command(about = "Model promotion gate CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (base -> env -> overrides...)
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    /// Fail instead of warn when the config has keys nothing reads
    #[arg(long, global = true, default_value_t = false)]
    strict_config: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Training run records
    Run {
        #[command(subcommand)]
        cmd: RunCmd,
    },

    /// Model versions and promotion
    Model {
        #[command(subcommand)]
        cmd: ModelCmd,
    },

    /// Decision log utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum RunCmd {
    /// Record a finished training run and print its run_id.
    Record {
        /// Experiment name the run belongs to
        #[arg(long)]
        experiment: String,

        /// Metric as key=value (repeatable), e.g. --metric accuracy=0.93
        #[arg(long = "metric", required = true)]
        metrics: Vec<String>,

        /// Hyperparameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,

        /// Use this run id instead of a generated UUID
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum ModelCmd {
    /// Register a CANDIDATE version from a recorded run.
    Register {
        /// Model name (falls back to /registry/model_name)
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        run_id: String,
    },

    /// Evaluate a CANDIDATE version against production and promote if it passes.
    Promote {
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        version: i64,
    },

    /// Register from a run, then evaluate and maybe promote.
    Pipeline {
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        run_id: String,
    },

    /// Print all versions and the current production version.
    Status {
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of a decision log.
    Verify {
        /// Decision log path (defaults to /audit/path)
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let cfg = commands::CliConfig::load(&cli.config_paths, cli.strict_config)?;

    match cli.cmd {
        Commands::Db { cmd } => match cmd {
            DbCmd::Status => commands::db_status(&cfg).await?,
            DbCmd::Migrate => commands::db_migrate(&cfg).await?,
        },

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mpg_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Run { cmd } => match cmd {
            RunCmd::Record {
                experiment,
                metrics,
                params,
                run_id,
            } => commands::run::record(&cfg, experiment, &metrics, &params, run_id).await?,
        },

        Commands::Model { cmd } => match cmd {
            ModelCmd::Register { model, run_id } => {
                commands::model::register(&cfg, model, &run_id).await?
            }
            ModelCmd::Promote { model, version } => {
                commands::model::promote(&cfg, model, version).await?
            }
            ModelCmd::Pipeline { model, run_id } => {
                commands::model::pipeline(&cfg, model, &run_id).await?
            }
            ModelCmd::Status { model } => commands::model::status(&cfg, model).await?,
        },

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => commands::audit_verify(&cfg, path)?,
        },
    }

    Ok(())
}

/// Logs go to stderr so stdout stays `key=value` only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
