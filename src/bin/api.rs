use gemini_relay::{api::start_server, config::AppConfig, conversational::ConversationService};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    if config.gateway.proxy_url.is_none() {
        warn!("⚠️  GAS_PROXY_URL not set, every model call will report a configuration error");
    }

    info!("🚀 Gemini Relay - API Server");
    info!("📍 Port: {}", config.port);

    let conversations = ConversationService::from_config(&config)?;

    info!("✅ Conversation service initialized");
    info!("📡 Starting API server...");

    tokio::select! {
        result = start_server(conversations, config.port) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping API server");
        }
    }

    Ok(())
}
