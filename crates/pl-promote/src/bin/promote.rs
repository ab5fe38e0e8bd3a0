use anyhow::Context;
use clap::Parser;
use pl_promote::{
    validate_container_name, AzureBlobStore, BlobStore, FsBlobStore, JobOutcome,
    PromotionConfig, PromotionPipeline,
};
use pl_tracking::{MlflowClient, TrackingConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Copy approved model versions from the registry into blob storage.
#[derive(Debug, Parser)]
#[command(name = "pl-promote", version)]
struct Args {
    /// Tracking server; read from MLFLOW_TRACKING_URI when omitted.
    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    tracking_uri: Option<String>,

    /// Mirror into `<dir>/<container>/` instead of Azure Blob Storage.
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// Container used with --local-root.
    #[arg(long, env = "ContainerName", default_value = "models")]
    container: String,

    /// Stage downloads here instead of the system temp directory.
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Print the per-file report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_store(args: &Args) -> anyhow::Result<Box<dyn BlobStore>> {
    match &args.local_root {
        Some(root) => {
            validate_container_name(&args.container)?;
            Ok(Box::new(FsBlobStore::new(root, args.container.as_str())))
        }
        None => {
            let config = PromotionConfig::from_env().context("blob storage configuration")?;
            Ok(Box::new(AzureBlobStore::from_config(&config)?))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let tracking = match &args.tracking_uri {
        Some(uri) => TrackingConfig::new(uri)?,
        None => TrackingConfig::from_env()?,
    };
    let store = build_store(&args)?;
    info!(
        tracking_uri = %tracking.tracking_uri,
        backend = store.backend_type(),
        container = %store.container(),
        "Starting promotion"
    );

    let client = MlflowClient::new(&tracking)?;
    let mut pipeline = PromotionPipeline::new(&client, &client, store.as_ref());
    if let Some(dir) = &args.staging_dir {
        pipeline = pipeline.with_staging_root(dir);
    }
    let report = pipeline.promote().await.context("registry scan failed")?;

    for job in &report.jobs {
        match &job.outcome {
            JobOutcome::Synced(sync) if sync.is_complete() => {
                info!(prefix = %job.prefix, uploaded = sync.uploaded(), "Promoted");
            }
            JobOutcome::Synced(sync) => {
                warn!(prefix = %job.prefix, failed = ?sync.failed_blobs(), "Promoted with failures");
            }
            JobOutcome::DownloadFailed { error } => {
                warn!(prefix = %job.prefix, error = %error, "Not promoted");
            }
        }
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report.is_complete())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("Some artifacts were not promoted; re-run to complete the mirror");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Promotion aborted");
            ExitCode::FAILURE
        }
    }
}
