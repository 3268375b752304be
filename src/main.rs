use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dbscribe::config;
use dbscribe::documenter;
use dbscribe::indexer::{self, IndexerOptions};
use dbscribe::models::RunStatus;
use dbscribe::planner::{self, PlannerOptions};

#[derive(Parser)]
#[command(
    name = "dbscribe",
    about = "dbscribe — generate searchable semantic documentation for relational databases",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/dbscribe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze schemas and emit the documentation plan
    Plan {
        /// Replan even if the existing plan is current
        #[arg(long)]
        force: bool,

        /// Analyze without writing the plan file
        #[arg(long)]
        dry_run: bool,
    },

    /// Execute the plan: generate per-table documentation and the manifest
    Document,

    /// Load the documented artifacts into the search index
    Index {
        /// Only re-index files whose content hash changed
        #[arg(long)]
        incremental: bool,

        /// Resume a previously interrupted indexing run
        #[arg(long)]
        resume: bool,

        /// Clear all prior index state before writing
        #[arg(long)]
        force: bool,

        /// Index without generating embeddings
        #[arg(long)]
        skip_embeddings: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Restrict to one work unit id (e.g. shop_orders)
        #[arg(long)]
        work_unit: Option<String>,

        /// Print index statistics and exit
        #[arg(long)]
        stats: bool,

        /// Verify manifest and index integrity and exit
        #[arg(long)]
        verify: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Plan { force, dry_run } => {
            planner::run_planner(&cfg, PlannerOptions { force, dry_run }).await?;
        }
        Commands::Document => {
            let status = documenter::run_documenter(&cfg).await?;
            // Intentional partial completion still exits 0; a run where no
            // unit produced anything does not.
            if status == RunStatus::Failed {
                anyhow::bail!("documentation run failed: no work unit completed");
            }
        }
        Commands::Index {
            incremental,
            resume,
            force,
            skip_embeddings,
            dry_run,
            work_unit,
            stats,
            verify,
        } => {
            if stats {
                indexer::run_indexer_stats(&cfg).await?;
            } else if verify {
                indexer::run_indexer_verify(&cfg).await?;
            } else {
                indexer::run_indexer(
                    &cfg,
                    IndexerOptions {
                        incremental,
                        resume,
                        force,
                        skip_embeddings,
                        dry_run,
                        work_unit,
                    },
                )
                .await?;
            }
        }
    }

    Ok(())
}
