/// Configuration management for the Nick Hider engine
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// User-facing privacy toggles and replacement values
///
/// Supplied and persisted by the host. Validate with
/// [`crate::validation::validate_privacy_config`] before applying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacyConfig {
    pub enabled: bool,
    pub hide_local_name: bool,
    pub hide_local_skin: bool,
    pub hide_local_cape: bool,
    pub hide_other_names: bool,
    pub hide_other_skins: bool,
    pub hide_other_capes: bool,
    pub local_name: String,
    pub local_skin_source: String,
    pub local_cape_source: String,
    pub others_name_template: String,
    pub others_skin_source: String,
    pub others_cape_source: String,
    pub allow_external_fallback: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hide_local_name: true,
            hide_local_skin: true,
            hide_local_cape: true,
            hide_other_names: false,
            hide_other_skins: false,
            hide_other_capes: false,
            local_name: "Player".to_string(),
            local_skin_source: String::new(),
            local_cape_source: String::new(),
            others_name_template: "Player_[ID]".to_string(),
            others_skin_source: String::new(),
            others_cape_source: String::new(),
            allow_external_fallback: false,
        }
    }
}

impl PrivacyConfig {
    /// Every configured source username, skin and cape, local and others
    pub fn source_usernames(&self) -> Vec<&str> {
        [
            self.local_skin_source.as_str(),
            self.local_cape_source.as_str(),
            self.others_skin_source.as_str(),
            self.others_cape_source.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect()
    }
}

/// Engine runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub breaker: BreakerConfig,
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub alias_file: PathBuf,
    pub texture_directory: PathBuf,
}

/// Remote identity service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Username to identity lookups
    pub api_base_url: String,
    /// Profile and texture lookups
    pub session_base_url: String,
    /// Skin probe for the external fallback provider
    pub external_skin_base_url: String,
    /// Cape lookup for the external fallback provider
    pub external_cape_base_url: String,
    /// Outbound requests allowed per second
    pub requests_per_second: u32,
}

/// Hook circuit breaker policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("nickhider/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 8,
            api_base_url: "https://api.mojang.com".to_string(),
            session_base_url: "https://sessionserver.mojang.com".to_string(),
            external_skin_base_url: "https://minotar.net/skin".to_string(),
            external_cape_base_url: "http://s.optifine.net/capes".to_string(),
            requests_per_second: 2,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> EngineResult<Self> {
        dotenv::dotenv().ok();

        let data_directory: PathBuf = env::var("NICKHIDER_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let alias_file = env::var("NICKHIDER_ALIAS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("ids.json"));
        let texture_directory = env::var("NICKHIDER_TEXTURE_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("skins"));

        let defaults = HttpConfig::default();
        let http = HttpConfig {
            user_agent: env::var("NICKHIDER_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout_secs: parse_var("NICKHIDER_HTTP_TIMEOUT_SECS", defaults.timeout_secs)?,
            api_base_url: env::var("NICKHIDER_API_BASE_URL").unwrap_or(defaults.api_base_url),
            session_base_url: env::var("NICKHIDER_SESSION_BASE_URL")
                .unwrap_or(defaults.session_base_url),
            external_skin_base_url: env::var("NICKHIDER_EXTERNAL_SKIN_BASE_URL")
                .unwrap_or(defaults.external_skin_base_url),
            external_cape_base_url: env::var("NICKHIDER_EXTERNAL_CAPE_BASE_URL")
                .unwrap_or(defaults.external_cape_base_url),
            requests_per_second: parse_var(
                "NICKHIDER_REQUESTS_PER_SECOND",
                defaults.requests_per_second,
            )?,
        };

        let breaker_defaults = BreakerConfig::default();
        let breaker = BreakerConfig {
            failure_threshold: parse_var(
                "NICKHIDER_BREAKER_THRESHOLD",
                breaker_defaults.failure_threshold,
            )?,
            open_secs: parse_var("NICKHIDER_BREAKER_OPEN_SECS", breaker_defaults.open_secs)?,
        };

        let logging = LoggingConfig {
            level: env::var("NICKHIDER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        let config = Self {
            storage: StorageConfig {
                data_directory,
                alias_file,
                texture_directory,
            },
            http,
            breaker,
            logging,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        if self.http.timeout_secs == 0 {
            return Err(EngineError::Config(
                "HTTP timeout must be at least one second".to_string(),
            ));
        }

        if self.http.requests_per_second == 0 {
            return Err(EngineError::Config(
                "Outbound request rate must be positive".to_string(),
            ));
        }

        for (label, url) in [
            ("API", &self.http.api_base_url),
            ("session", &self.http.session_base_url),
            ("external skin", &self.http.external_skin_base_url),
            ("external cape", &self.http.external_cape_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(EngineError::Config(format!(
                    "Invalid {} base URL: {}",
                    label, url
                )));
            }
        }

        if self.breaker.failure_threshold == 0 {
            return Err(EngineError::Config(
                "Circuit breaker threshold must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> EngineResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EngineError::Config(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
