use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sales_dashboard::config::AppConfig;
use sales_dashboard::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Override with RUST_LOG, e.g. RUST_LOG=sales_dashboard=debug
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sales_dashboard=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let address = config.server_address();
    let state = AppState::from_config(config)?;
    let app = create_app(state);

    tracing::info!("Starting sales dashboard on {}", address);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
