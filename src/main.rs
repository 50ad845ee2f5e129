use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use orcid_pipeline::admin;
use orcid_pipeline::api::client::HttpApiClient;
use orcid_pipeline::pipeline::queues::Pipeline;
use orcid_pipeline::store::ProfileStore;
use orcid_pipeline::Config;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation pipeline (update poller + workers)
    Run,
    /// Replay the claims log and re-import every touched profile
    ReindexClaims {
        /// Starting date (RFC 3339); defaults to the stored checkpoint
        #[arg(long)]
        since: Option<String>,
        /// Comma-delimited list of ORCID iDs to re-index
        #[arg(long)]
        oid: Option<String>,
    },
    /// Re-push records updated since a date to the output queue
    RepushClaims {
        /// Starting date (RFC 3339); defaults to the stored checkpoint
        #[arg(long)]
        since: Option<String>,
        /// Comma-delimited list of ORCID iDs to re-process
        #[arg(long)]
        oid: Option<String>,
    },
    /// Enqueue every profile touched since a date
    RefetchOrcidids {
        /// Starting date (RFC 3339); defaults to the stored checkpoint
        #[arg(long)]
        since: Option<String>,
        /// Comma-delimited list of ORCID iDs to enqueue
        #[arg(long)]
        oid: Option<String>,
    },
    /// Verify and repair claim-array lengths for the given bibcodes
    ReprocessBibcodes {
        /// Comma-delimited bibcodes, or @file with one per line
        #[arg(long)]
        bibcodes: String,
        /// Rebuild mis-sized arrays even when they hold claims
        #[arg(long)]
        force: bool,
    },
    /// Show the stored key/value checkpoints
    Kv,
    /// Show what the pipeline sees for profiles and bibcodes
    Diagnose {
        /// Comma-delimited list of ORCID iDs
        #[arg(long)]
        oid: Option<String>,
        /// Comma-delimited list of bibcodes
        #[arg(long)]
        bibcodes: Option<String>,
    },
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(version = orcid_pipeline::VERSION, "starting orcid pipeline");

    let config = Arc::new(config);
    let api = Arc::new(HttpApiClient::new((*config).clone()));
    let store = Arc::new(ProfileStore::open(&config, api.clone())?);
    let pipeline = Pipeline::start(store, api, config);
    let ctx = pipeline.context();

    match cli.command {
        Commands::Run => {
            pipeline.run_service().await?;
        }
        Commands::ReindexClaims { since, oid } => {
            admin::reindex_claims(&ctx, since.as_deref(), &split_csv(oid.as_deref())).await?;
            pipeline.run_until_idle().await;
        }
        Commands::RepushClaims { since, oid } => {
            admin::repush_claims(&ctx, since.as_deref(), &split_csv(oid.as_deref())).await?;
            pipeline.run_until_idle().await;
        }
        Commands::RefetchOrcidids { since, oid } => {
            admin::refetch_orcidids(&ctx, since.as_deref(), &split_csv(oid.as_deref())).await?;
            pipeline.run_until_idle().await;
        }
        Commands::ReprocessBibcodes { bibcodes, force } => {
            let bibcodes = admin::load_bibcodes(&bibcodes)?;
            admin::reprocess_bibcodes(&ctx, &bibcodes, force).await?;
            pipeline.run_until_idle().await;
        }
        Commands::Kv => {
            admin::print_kvs(&ctx)?;
        }
        Commands::Diagnose { oid, bibcodes } => {
            let oids = if oid.is_some() {
                split_csv(oid.as_deref())
            } else {
                vec!["0000-0003-3041-2092".to_string()]
            };
            let bibs = if bibcodes.is_some() {
                split_csv(bibcodes.as_deref())
            } else {
                vec!["2015arXiv150305881C".to_string()]
            };
            admin::show_api_diagnostics(&ctx, &oids, &bibs).await?;
        }
    }

    pipeline.shutdown();
    Ok(())
}
