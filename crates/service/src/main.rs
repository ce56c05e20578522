use tracing::info;
use tracing_subscriber::EnvFilter;

use project_brain_service::config::ServiceConfig;
use project_brain_service::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_tracing();
    let config = ServiceConfig::from_env()?;
    let state = AppState::connect(&config.file, &config.pinecone).await?;
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
