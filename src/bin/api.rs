use analyst_pipeline::{
    api::{start_server, ApiState},
    Settings,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Loads .env as well
    let settings = Settings::from_env()?;

    info!("Analyst Pipeline - API Server");
    info!("Port: {}", settings.api_port);
    match settings.mcp_url.as_deref() {
        Some(url) => info!(
            endpoint = url.split('?').next().unwrap_or(url),
            "Remote tool provider configured"
        ),
        None => info!("No remote tool provider configured, research will use local tools"),
    }

    let state = ApiState::from_settings(&settings)?;

    info!("Pipeline initialized");
    info!("Starting API server...");

    start_server(state, settings.api_port).await?;

    Ok(())
}
