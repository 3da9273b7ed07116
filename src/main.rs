// Kira Market API server

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_market::{app_state::AppState, config::Config, market_interface::create_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let address = config.server_address();

    let app_state = AppState::new(config).await?;
    let app = create_app(app_state);

    let listener = TcpListener::bind(&address).await?;
    info!(address = %address, "Kira Market API listening");
    info!("  /api/v1/listings        legacy car listings");
    info!("  /api/v1/v2/listings     universal listings");
    info!("  /api/v1/categories      categories and their attributes");

    axum::serve(listener, app).await?;
    Ok(())
}
