//! Parts Loader CLI - load imagery footprint CSV files into polygon parts
//!
//! ```bash
//! parts-loader -i parts.csv                 # Load a file in one transaction
//! parts-loader check -i parts.csv           # Dry run, no database
//! parts-loader check -i parts.csv --records # Dry run, print records as JSON lines
//! parts-loader publish -i layers.csv        # Publish catalog layers
//! parts-loader publish --catalog-id <id> -i footprints.csv
//!                                           # Publish one layer from a footprint file
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use parts_loader::report::logs::{log_info, log_warning};
use parts_loader::{check_file, LayerOutcome, Loader, LoaderConfig, PgPartStore, Publisher};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parts-loader")]
#[command(about = "Load imagery footprint CSV files into polygon parts storage", long_about = None)]
struct Cli {
    /// Input CSV file to load
    #[arg(short, long)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and transform a file without touching the database
    Check {
        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Print every record as a JSON line
        #[arg(long)]
        records: bool,
    },

    /// Publish the catalog layers listed in a file, or one layer from a footprint file
    Publish {
        /// CSV file with a catalogId column, or a footprint file with --catalog-id
        #[arg(short, long)]
        input: PathBuf,

        /// Publish this layer with the parts listed in the input file
        #[arg(long)]
        catalog_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match (cli.command, cli.input) {
        (Some(Commands::Check { input, records }), _) => cmd_check(&input, records),
        (Some(Commands::Publish { input, catalog_id: None }), _) => cmd_publish(&input).await,
        (Some(Commands::Publish { input, catalog_id: Some(id) }), _) => cmd_publish_parts(&id, &input).await,
        (None, Some(input)) => cmd_load(&input).await,
        (None, None) => {
            let _ = Cli::command().print_help();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_load(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = LoaderConfig::from_env()?;
    let store = PgPartStore::connect(&config.db).await?;
    let loader = Loader::new(store, &config);
    let summary = loader.load_file_until(input, shutdown_signal()).await?;

    println!("{}", summary);
    Ok(())
}

fn cmd_check(input: &Path, records: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = LoaderConfig::from_env()?;
    let report = check_file(input, config.csv.delimiter, &config.ingest)?;

    if records {
        for record in &report.records {
            println!("{}", serde_json::to_string(record)?);
        }
    }
    println!("{}", report.summary);
    Ok(())
}

async fn cmd_publish(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = LoaderConfig::from_env()?;
    let publisher = Publisher::from_config(&config.clients)?;
    let summary = publisher.publish_file(input, config.csv.delimiter).await?;

    println!(
        "Published: {}\nAlready published: {}\nFailed: {}",
        summary.published, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        return Err(format!("{} layers failed to publish", summary.failed).into());
    }
    Ok(())
}

async fn cmd_publish_parts(catalog_id: &str, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = LoaderConfig::from_env()?;
    let publisher = Publisher::from_config(&config.clients)?;

    match publisher
        .publish_parts_file(catalog_id, input, config.csv.delimiter)
        .await?
    {
        LayerOutcome::Published => println!("Published layer {}", catalog_id),
        LayerOutcome::AlreadyPublished => println!("Layer {} is already published", catalog_id),
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log_warning(format!("Failed to listen for Ctrl+C: {}", e));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log_warning(format!("Failed to install terminate handler: {}", e));
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log_info("Received Ctrl+C, cancelling"),
        _ = terminate => log_info("Received terminate signal, cancelling"),
    }
}
