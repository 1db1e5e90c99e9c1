use gemini_relay::{
    config::AppConfig,
    conversational::ConversationService,
    error::RelayError,
    telegram::{BotApi, TelegramBot},
};
use tracing::{error, info};
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

    let token = config.telegram.token.clone().ok_or_else(|| {
        error!("TELEGRAM_TOKEN is not set");
        RelayError::ConfigError("TELEGRAM_TOKEN must be set".to_string())
    })?;

    if config.gateway.proxy_url.is_none() {
        error!("GAS_PROXY_URL is not set");
        return Err(RelayError::ConfigError("GAS_PROXY_URL must be set".to_string()).into());
    }

    info!("🤖 Gemini Relay - Telegram Bot");
    info!("🧠 Model: {}", config.gateway.model);

    let conversations = ConversationService::from_config(&config)?;
    let api = BotApi::new(config.telegram.api_url.clone(), token)?;
    let bot = TelegramBot::connect(api, conversations, config.telegram.webapp_url.clone()).await?;

    info!("✅ Bot @{} is running", bot.username());

    tokio::select! {
        _ = bot.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping bot");
        }
    }

    Ok(())
}
