use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Variable holding the raw encryption key material.
pub const ENCRYPTION_KEY_VAR: &str = "ENCRYPTION_KEY";

/// Variable naming the deployment environment.
pub const APP_ENV_VAR: &str = "APP_ENV";

/// Encryption key and environment settings
#[derive(Deserialize, Clone)]
pub struct SecurityConfig {
    /// Raw key material (base64, hex, or a passphrase)
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Deployment environment; only "production" is treated specially
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Whether a throwaway key may replace a missing or invalid one outside
    /// production. Unset means allowed.
    #[serde(default)]
    pub allow_ephemeral_key: Option<bool>,
}

fn default_environment() -> String {
    "development".to_string()
}

impl SecurityConfig {
    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// Never in production. Elsewhere defaults to allowed.
    pub fn ephemeral_fallback_allowed(&self) -> bool {
        !self.is_production() && self.allow_ephemeral_key.unwrap_or(true)
    }

    pub fn has_key_material(&self) -> bool {
        self.encryption_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            environment: default_environment(),
            allow_ephemeral_key: None,
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .field("allow_ephemeral_key", &self.allow_ephemeral_key)
            .finish()
    }
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://configgate.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Admin HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

fn default_web_host() -> String {
    "127.0.0.1".to_string()
}

fn default_web_port() -> u16 {
    8088
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl WebConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default config file
            .add_source(File::with_name("config/default").required(false))
            // Override with local config if present
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (prefix: CONFIGGATE_)
            // e.g., CONFIGGATE_DATABASE__URL, CONFIGGATE_WEB__PORT
            .add_source(
                Environment::with_prefix("CONFIGGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            // The two canonical variables win over everything else
            .set_override_option(
                "security.encryption_key",
                std::env::var(ENCRYPTION_KEY_VAR).ok(),
            )?
            .set_override_option("security.environment", std::env::var(APP_ENV_VAR).ok())?
            .build()?;

        config.try_deserialize()
    }

    /// Initialize the global config singleton
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }
}
