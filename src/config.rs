//! Environment-driven configuration
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file by the binaries.

use crate::error::RelayError;
use crate::Result;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_HISTORY_WINDOW: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_WEBAPP_URL: &str = "https://your-domain.com";

/// Seed instruction sent as the first turn of every new conversation.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "Always answer in Russian unless the question asks for another language. \
If a file is attached, analyse it carefully. \
If the answer contains program code, always format it as a fenced block with syntax highlighting \
(for example, ```python\\nyour_code\\n```). \
Before each code block, add a short introductory sentence.";

/// Retry and timeout policy for calls to the model proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls per request, the first one included (`PROXY_MAX_ATTEMPTS`)
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Proxy endpoint; `None` until `GAS_PROXY_URL` is set
    pub proxy_url: Option<String>,
    pub model: String,
    pub system_instruction: String,
    pub retry: RetryPolicy,
}

impl GatewayConfig {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: Some(proxy_url.into()),
            ..Self::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            model: DEFAULT_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: Option<String>,
    pub api_url: String,
    pub webapp_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            webapp_url: DEFAULT_WEBAPP_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub telegram: TelegramConfig,
    pub history_window: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            telegram: TelegramConfig::default(),
            history_window: DEFAULT_HISTORY_WINDOW,
            port: DEFAULT_PORT,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration from an explicit map (used by tests)
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(get("PROXY_MAX_ATTEMPTS"), "PROXY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            timeout: Duration::from_secs(parse_or(
                get("PROXY_TIMEOUT_SECS"),
                "PROXY_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            backoff: Duration::from_millis(parse_or(
                get("PROXY_BACKOFF_MS"),
                "PROXY_BACKOFF_MS",
                DEFAULT_BACKOFF_MS,
            )?),
        };

        if retry.max_attempts == 0 {
            return Err(RelayError::ConfigError(
                "PROXY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let gateway = GatewayConfig {
            proxy_url: get("GAS_PROXY_URL"),
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_instruction: get("SYSTEM_INSTRUCTION")
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            retry,
        };

        let telegram = TelegramConfig {
            token: get("TELEGRAM_TOKEN"),
            api_url: get("TELEGRAM_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            webapp_url: get("WEBAPP_URL").unwrap_or_else(|| DEFAULT_WEBAPP_URL.to_string()),
        };

        let port_var = get("PORT").or_else(|| get("API_PORT"));

        Ok(Self {
            gateway,
            telegram,
            history_window: parse_or(get("HISTORY_WINDOW"), "HISTORY_WINDOW", DEFAULT_HISTORY_WINDOW)?,
            port: parse_or(port_var, "PORT", DEFAULT_PORT)?,
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw.parse().map_err(|_| {
            RelayError::ConfigError(format!("{} has an invalid value: {}", key, raw))
        }),
        None => Ok(default),
    }
}
