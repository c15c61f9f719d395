use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5000";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_IDENTITY_FILE: &str = ".chattersphere.json";

const SERVER_URL_VAR: &str = "CHATTERSPHERE_SERVER_URL";
const CONNECT_TIMEOUT_VAR: &str = "CHATTERSPHERE_CONNECT_TIMEOUT_MS";
const AUDIO_DIR_VAR: &str = "CHATTERSPHERE_AUDIO_DIR";
const TIMELINE_LIMIT_VAR: &str = "CHATTERSPHERE_TIMELINE_LIMIT";
const IDENTITY_FILE_VAR: &str = "CHATTERSPHERE_IDENTITY_FILE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    #[error("Invalid server URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported URL scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),
}

/// Settings shared by chat sessions and the room directory
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the room server
    pub server_url: Url,
    pub connect_timeout: Duration,
    /// Where received voice messages are written while they are playable
    pub audio_dir: PathBuf,
    /// Oldest timeline events are evicted past this many entries
    pub timeline_limit: Option<usize>,
    /// Key-value file holding the remembered username
    pub identity_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse(DEFAULT_SERVER_URL).expect("default server URL is valid"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            audio_dir: env::temp_dir(),
            timeline_limit: None,
            identity_file: PathBuf::from(DEFAULT_IDENTITY_FILE),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(url) = env_var(SERVER_URL_VAR) {
            config.server_url = parse_server_url(&url)?;
        }

        if let Some(timeout_ms) = env_var(CONNECT_TIMEOUT_VAR) {
            let millis = parse_number::<u64>(CONNECT_TIMEOUT_VAR, &timeout_ms)?;
            if millis == 0 {
                return Err(ConfigError::InvalidValue {
                    var: CONNECT_TIMEOUT_VAR.to_string(),
                    reason: "timeout must be greater than zero".to_string(),
                });
            }
            config.connect_timeout = Duration::from_millis(millis);
        }

        if let Some(dir) = env_var(AUDIO_DIR_VAR) {
            config.audio_dir = PathBuf::from(dir);
        }

        if let Some(limit) = env_var(TIMELINE_LIMIT_VAR) {
            let limit = parse_number::<usize>(TIMELINE_LIMIT_VAR, &limit)?;
            config.timeline_limit = (limit > 0).then_some(limit);
        }

        if let Some(path) = env_var(IDENTITY_FILE_VAR) {
            config.identity_file = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Replace the server endpoint, e.g. from a command line flag
    pub fn with_server_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.server_url = parse_server_url(url)?;
        Ok(self)
    }
}

/// Parse and validate a WebSocket endpoint
pub fn parse_server_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_number<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

/// Load configuration with helpful error messages
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    match ClientConfig::load() {
        Ok(config) => {
            log::info!("Loaded client configuration (server: {})", config.server_url);
            Ok(config)
        }
        Err(ConfigError::InvalidValue { var, reason }) => {
            log::error!("Invalid value for {}: {}", var, reason);
            log::error!("Fix it in your environment or .env file, or unset it to use the default");
            Err(ConfigError::InvalidValue { var, reason })
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!("{}=ws://host:port is the expected format", SERVER_URL_VAR);
            Err(e)
        }
    }
}
