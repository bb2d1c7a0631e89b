use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image_ingest::app::App;
use image_ingest::config::Config;
use image_ingest::models::{NewProduct, ProductFilter};
use image_ingest::queue::KafkaRequestSource;
use image_ingest::repository::PgProductRepository;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "image-ingest")]
#[command(about = "Compress and store product images")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume processing requests until interrupted.
    Worker,
    /// Create the products table if it does not exist.
    Migrate,
    /// Create a product from a JSON file and publish its images.
    Create {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Print one product as JSON.
    Get {
        #[arg(value_name = "ID")]
        id: i64,
    },
    /// Print matching products as JSON.
    List {
        #[arg(long)]
        owner_id: Option<i64>,
        #[arg(long)]
        min_price: Option<f64>,
        #[arg(long)]
        max_price: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args.command, &config).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Migrate => {
            let repository =
                PgProductRepository::connect(&config.database_url, config.database_max_connections)
                    .await?;
            repository.migrate().await?;
            info!("Schema is up to date");
        }
        Command::Worker => run_worker(config).await?,
        Command::Create { path } => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let new_product: NewProduct =
                serde_json::from_str(&raw).context("parsing product JSON")?;

            let app = App::from_config(config).await?;
            let created = app.catalog().create_product(new_product).await?;
            for (request, e) in &created.publish_errors {
                warn!(image_url = %request.image_url, "Not queued: {}", e);
            }
            println!("{}", serde_json::to_string_pretty(&created.product)?);
        }
        Command::Get { id } => {
            let app = App::from_config(config).await?;
            let product = app.catalog().get_product(id).await?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }
        Command::List {
            owner_id,
            min_price,
            max_price,
        } => {
            let app = App::from_config(config).await?;
            let filter = ProductFilter {
                owner_id,
                min_price,
                max_price,
            };
            let products = app.catalog().list_products(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&products)?);
        }
    }
    Ok(())
}

async fn run_worker(config: &Config) -> Result<()> {
    info!("Starting image-ingest worker");

    let app = App::from_config(config).await?;
    let source = Arc::new(KafkaRequestSource::new(&config.kafka)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, finishing current batch"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let stats = app.worker(source, shutdown_rx).run().await?;
    info!(
        done = stats.done,
        abandoned = stats.abandoned,
        malformed = stats.malformed,
        "Worker finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{CliArgs, Command};
    use clap::Parser;

    #[test]
    fn test_parse_list_filters() {
        let args = CliArgs::try_parse_from([
            "image-ingest",
            "list",
            "--owner-id",
            "3",
            "--max-price",
            "9.5",
        ])
        .unwrap();

        match args.command {
            Command::List {
                owner_id,
                min_price,
                max_price,
            } => {
                assert_eq!(owner_id, Some(3));
                assert_eq!(min_price, None);
                assert_eq!(max_price, Some(9.5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_get_requires_numeric_id() {
        assert!(CliArgs::try_parse_from(["image-ingest", "get", "abc"]).is_err());
        assert!(matches!(
            CliArgs::try_parse_from(["image-ingest", "get", "12"])
                .unwrap()
                .command,
            Command::Get { id: 12 }
        ));
    }
}
