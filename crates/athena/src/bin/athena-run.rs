//! athena-run — run queries and incremental models against AWS Athena.
//!
//! Connection settings come from a YAML profile (`--profile`) or from
//! `ATHENA_*` environment variables (a `.env` file is honored).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use dbathena_adapter::backend::load_sdk_config;
use dbathena_adapter::{
    AthenaClient, ConnectionProfile, IncrementalConfig, IncrementalModel, IncrementalRunner,
    S3PartitionStore, TableConfig, UniqueKey,
};
use dbathena_core::Relation;

// ── CLI ─────────────────────────────────────────────────────────────

/// Run SQL and incremental models against AWS Athena.
#[derive(Parser, Debug)]
#[command(name = "athena-run", version, about)]
struct Cli {
    /// YAML connection profile; falls back to ATHENA_* env vars.
    #[arg(long, env = "ATHENA_PROFILE_FILE")]
    profile: Option<PathBuf>,

    /// Output name inside a dbt profiles.yml (requires --profile-name).
    #[arg(long, requires = "profile_name")]
    target: Option<String>,

    /// Treat --profile as a dbt profiles.yml and pick this profile from it.
    #[arg(long, requires = "profile")]
    profile_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one query and print its result table.
    Query {
        /// SQL text to execute.
        sql: String,
    },
    /// Materialize a model incrementally into its target table.
    Incremental {
        /// Target as schema.table or database.schema.table.
        #[arg(long)]
        relation: String,

        /// File holding the model's SELECT.
        #[arg(long)]
        sql_file: PathBuf,

        /// YAML table configuration (partitioned_by, format, ...).
        #[arg(long)]
        table_config: Option<PathBuf>,

        /// append or insert_overwrite.
        #[arg(long)]
        strategy: Option<String>,

        /// Rejected by both strategies; accepted so the error is explicit.
        #[arg(long)]
        unique_key: Vec<String>,
    },
}

fn load_profile(cli: &Cli) -> Result<ConnectionProfile> {
    let profile = match (&cli.profile, &cli.profile_name) {
        (Some(path), Some(name)) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            ConnectionProfile::from_profiles_yml(&text, name, cli.target.as_deref())?
        }
        (Some(path), None) => ConnectionProfile::from_yaml_file(path)
            .with_context(|| format!("failed to load profile {}", path.display()))?,
        (None, _) => ConnectionProfile::from_env().context("failed to load profile from env")?,
    };
    Ok(profile)
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dbathena_core::load_dotenv();
    let cli = Cli::parse();
    let profile = load_profile(&cli)?;

    info!(
        region = %profile.region_name,
        schema = %profile.schema,
        "athena-run starting"
    );

    let client = Arc::new(AthenaClient::connect(profile.clone()).await?);

    match cli.command {
        Command::Query { sql } => {
            let result = client.execute(&sql).await?;
            println!("{result}");
        }
        Command::Incremental {
            relation,
            sql_file,
            table_config,
            strategy,
            unique_key,
        } => {
            let relation = Relation::parse(&relation, &profile.database)?;
            let sql = std::fs::read_to_string(&sql_file)
                .with_context(|| format!("failed to read {}", sql_file.display()))?;
            let table = match table_config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    TableConfig::from_yaml_str(&text)?
                }
                None => TableConfig::default(),
            };
            let incremental = IncrementalConfig {
                incremental_strategy: strategy,
                unique_key: (!unique_key.is_empty()).then_some(UniqueKey::Multiple(unique_key)),
            };

            let store = Arc::new(S3PartitionStore::new(&load_sdk_config(&profile).await));
            let runner = IncrementalRunner::new(client, store);
            let summary = runner
                .run(&IncrementalModel {
                    relation,
                    sql,
                    table,
                    incremental,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    info!("athena-run exited cleanly");
    Ok(())
}
