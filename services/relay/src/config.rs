use std::net::SocketAddr;
use tracing::Level;

/// Default conversational endpoint of the voice-agent vendor. The agent
/// identifier is appended as a query parameter at connect time.
const DEFAULT_VENDOR_WS_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub vendor_api_key: String,
    pub vendor_agent_id: String,
    /// Endpoint override, used to point the relay at a test double. When
    /// set, the URL is used verbatim and no agent query parameter is added.
    pub vendor_ws_url: Option<String>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// A missing or too-short vendor credential is fatal: the process must
    /// not begin accepting connections with a key it cannot authenticate
    /// upstream with.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let vendor_api_key = std::env::var("VENDOR_API_KEY")
            .map_err(|_| ConfigError::MissingVar("VENDOR_API_KEY".to_string()))?;
        if vendor_api_key.trim().len() < 8 {
            return Err(ConfigError::InvalidValue(
                "VENDOR_API_KEY".to_string(),
                "must be at least 8 characters".to_string(),
            ));
        }

        let vendor_agent_id = std::env::var("VENDOR_AGENT_ID")
            .map_err(|_| ConfigError::MissingVar("VENDOR_AGENT_ID".to_string()))?;
        if vendor_agent_id.trim().len() < 4 {
            return Err(ConfigError::InvalidValue(
                "VENDOR_AGENT_ID".to_string(),
                "must be at least 4 characters".to_string(),
            ));
        }

        let vendor_ws_url = std::env::var("VENDOR_WS_URL").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            vendor_api_key,
            vendor_agent_id,
            vendor_ws_url,
            log_level,
        })
    }

    /// The full vendor WebSocket URL for this agent.
    pub fn vendor_url(&self) -> String {
        match &self.vendor_ws_url {
            Some(url) => url.clone(),
            None => format!(
                "{}?agent_id={}",
                DEFAULT_VENDOR_WS_URL, self.vendor_agent_id
            ),
        }
    }
}
