// Copy legacy car listings into the universal listing tables

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use kira_market::{
    config::Config,
    infrastructure::MarketDatabase,
    services::car_migration::{self, MigrationOptions},
};

#[derive(Parser, Debug)]
#[command(name = "migrate_cars_to_v2")]
#[command(about = "Migrate legacy car listings into the universal listing schema", long_about = None)]
struct Args {
    /// Count what would be migrated without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Only process the first N legacy listings (by id)
    #[arg(long, value_name = "N")]
    limit: Option<u32>,

    /// Write the legacy to universal id mapping as JSON
    #[arg(long, value_name = "PATH")]
    map_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let db = MarketDatabase::connect(&config.database.url).await?;

    let report = car_migration::run(
        &db,
        MigrationOptions {
            dry_run: args.dry_run,
            limit: args.limit,
        },
    )
    .await?;

    if report.dry_run {
        println!("Dry run, nothing was written.");
    }
    println!(
        "Cars category {}: {} attributes created, {} updated",
        report.category_id, report.attributes_created, report.attributes_updated
    );
    println!("{}", report);

    if let Some(path) = args.map_out {
        let json = serde_json::to_string_pretty(&report.id_map)?;
        std::fs::write(&path, json)?;
        println!("Wrote {} id mappings to {}", report.id_map.len(), path.display());
    }
    Ok(())
}
