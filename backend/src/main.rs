//! Stockflow - operator CLI
//!
//! Runs schema migrations, checks the ledger against item balances and
//! previews FIFO allocations against a PostgreSQL database.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use stockflow_backend::config::{Config, LoggingConfig};
use stockflow_backend::services::{BroadcastEventSink, EngineServices};
use stockflow_backend::store::PgStore;

#[derive(Parser)]
#[command(name = "stockflow", version, about = "Inventory movement engine tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Report items whose quantity disagrees with their ledger
    VerifyLedger,
    /// Preview a FIFO billing allocation without saving it
    Allocate {
        #[arg(long)]
        customer: Uuid,
        #[arg(long)]
        product: Uuid,
        #[arg(long)]
        quantity: Decimal,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter.as_str()));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    init_tracing(&config.logging);

    tracing::info!("Environment: {}", config.environment);
    let store = PgStore::connect(&config.database).await?;
    tracing::info!("Database connection established");

    match cli.command {
        Command::Migrate => {
            store.migrate().await?;
            tracing::info!("Migrations completed");
        }
        Command::VerifyLedger => {
            let services = engine(store, &config);
            let mismatches = services.movements.reconcile().await?;
            if !mismatches.is_empty() {
                println!("{}", serde_json::to_string_pretty(&mismatches)?);
                bail!("{} item(s) disagree with the ledger", mismatches.len());
            }
            println!("Ledger consistent");
        }
        Command::Allocate {
            customer,
            product,
            quantity,
        } => {
            let services = engine(store, &config);
            let allocations = services
                .invoices
                .find_invoiceable_items_by_quantity(customer, product, quantity)
                .await?;
            println!("{}", serde_json::to_string_pretty(&allocations)?);
        }
    }

    Ok(())
}

fn engine(store: PgStore, config: &Config) -> EngineServices {
    EngineServices::new(
        Arc::new(store),
        Arc::new(BroadcastEventSink::new(config.events.channel_capacity)),
        config.engine.clone(),
    )
}
