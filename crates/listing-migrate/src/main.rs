//! Listing migration - main entry point

use anyhow::{Context, Result};
use clap::Parser;
use listing_common::logging::init_logging;
use listing_migrate::assets::{AssetTransferEngine, HttpFetcher};
use listing_migrate::db::PgPropertyStore;
use listing_migrate::storage::S3ObjectStore;
use listing_migrate::{Cli, CheckpointStore, FileBackend, MigrationConfig, Mode, Orchestrator, Phase};
use std::process;
use std::sync::Arc;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // A run without its error log is not allowed to start
    let _guard = match cli.log_config().and_then(|config| init_logging(&config)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {:#}", e);
            process::exit(1);
        },
    };

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Migration failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = MigrationConfig::from_env().context("Invalid migration configuration")?;
    if let Some(path) = cli.checkpoint {
        config.checkpoint_path = path;
    }
    if cli.no_progress {
        config.show_progress = false;
    }

    let mut checkpoint = CheckpointStore::open(FileBackend::new(&config.checkpoint_path))
        .context("Failed to open checkpoint")?;

    let mut orchestrator = Orchestrator::new(config.clone(), &cli.input).with_limit(cli.limit);

    if cli.mode.needs_store() {
        let url = config.require_database()?;
        let store = PgPropertyStore::connect(url, config.database_max_connections)
            .await
            .context("Failed to connect to the property store")?;
        orchestrator = orchestrator.with_store(Arc::new(store));
    }

    // A resume interrupted during images finishes them too
    let resumes_images = cli.mode == Mode::Resume && checkpoint.phase() == Phase::Images;
    if cli.mode.needs_assets() || resumes_images {
        let storage = S3ObjectStore::new(config.require_storage()?.clone())
            .await
            .context("Failed to initialize object storage")?;
        let fetcher = HttpFetcher::new(config.image_timeout()).context("Failed to build HTTP client")?;
        let engine = AssetTransferEngine::new(config.asset_config(), Arc::new(fetcher), Arc::new(storage))
            .context("Invalid media URL template")?;
        orchestrator = orchestrator.with_assets(engine);
    }

    let summary = orchestrator.run(cli.mode, &mut checkpoint).await?;
    summary.print();
    Ok(())
}
