use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Configuration errors. All of these are fatal at startup: the broker never
/// serves traffic with an invalid or incomplete configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required config field: {0}")]
    MissingField(&'static str),

    #[error("invalid server.base_url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL of the broker, used to build the OAuth redirect URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Browser origins allowed to call the API with credentials.
    #[serde(default)]
    pub client_urls: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            client_urls: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// GitHub App ID.
    #[serde(default)]
    pub app_id: String,
    /// Installation the broker authenticates as.
    #[serde(default)]
    pub installation_id: String,
    /// Path to the App's private key in PEM format.
    #[serde(default)]
    pub private_key_path: PathBuf,
    /// GitHub REST API root. Point at a GitHub Enterprise host to use one.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            installation_id: String::new(),
            private_key_path: PathBuf::new(),
            api_url: default_api_url(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// OAuth client ID of the GitHub App.
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,
    /// Secret used to sign session and login-state tokens.
    #[serde(default)]
    pub signing_key: String,
    /// Lifetime of issued sessions, in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// How long a pending login attempt stays valid, in seconds.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
    /// OAuth endpoints. Overridable for GitHub Enterprise deployments.
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_user_url")]
    pub user_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            signing_key: String::new(),
            session_ttl_secs: default_session_ttl(),
            state_ttl_secs: default_state_ttl(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            user_url: default_user_url(),
        }
    }
}

fn default_session_ttl() -> u64 {
    // 12 hours
    12 * 60 * 60
}

fn default_state_ttl() -> u64 {
    // 10 minutes; a login attempt that never comes back expires on its own
    10 * 60
}

fn default_authorize_url() -> String {
    "https://github.com/login/oauth/authorize".to_string()
}

fn default_token_url() -> String {
    "https://github.com/login/oauth/access_token".to_string()
}

fn default_user_url() -> String {
    "https://api.github.com/user".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    /// Check everything the broker cannot run without. Called once at startup,
    /// before either authenticator is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parse_base_url()?;

        if self.github.app_id.is_empty() {
            return Err(ConfigError::MissingField("github.app_id"));
        }
        if self.github.installation_id.is_empty() {
            return Err(ConfigError::MissingField("github.installation_id"));
        }
        if self.github.private_key_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("github.private_key_path"));
        }
        if self.oauth.client_id.is_empty() {
            return Err(ConfigError::MissingField("oauth.client_id"));
        }
        if self.oauth.client_secret.is_empty() {
            return Err(ConfigError::MissingField("oauth.client_secret"));
        }
        if self.oauth.signing_key.is_empty() {
            return Err(ConfigError::MissingField("oauth.signing_key"));
        }
        if self.oauth.session_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "oauth.session_ttl_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.oauth.state_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "oauth.state_ttl_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Parse and sanity-check `server.base_url`.
    pub fn parse_base_url(&self) -> Result<reqwest::Url, ConfigError> {
        let url = reqwest::Url::parse(&self.server.base_url).map_err(|e| {
            ConfigError::InvalidBaseUrl {
                url: self.server.base_url.clone(),
                reason: e.to_string(),
            }
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.server.base_url.clone(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.server.base_url.clone(),
                reason: "missing host".to_string(),
            });
        }

        Ok(url)
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            github: GitHubConfig::default(),
            oauth: OAuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.github.app_id = "12345".to_string();
        config.github.installation_id = "67890".to_string();
        config.github.private_key_path = PathBuf::from("key.pem");
        config.oauth.client_id = "Iv1.abc".to_string();
        config.oauth.client_secret = "secret".to_string();
        config.oauth.signing_key = "0123456789abcdef0123456789abcdef".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.base_url, "http://localhost:3000");
        assert_eq!(config.oauth.session_ttl_secs, 12 * 60 * 60);
        assert_eq!(config.oauth.state_ttl_secs, 600);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            base_url = "https://auth.example.org"
            client_urls = ["https://app.example.org"]

            [github]
            app_id = "12345"
            installation_id = "67890"
            private_key_path = "/etc/hubgate/app.pem"

            [oauth]
            client_id = "Iv1.abc"
            client_secret = "shhh"
            signing_key = "0123456789abcdef0123456789abcdef"
            session_ttl_secs = 3600
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.client_urls, vec!["https://app.example.org"]);
        assert_eq!(config.github.app_id, "12345");
        assert_eq!(config.oauth.session_ttl_secs, 3600);
        // Untouched fields keep their defaults
        assert_eq!(config.oauth.state_ttl_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("github.app_id"))
        ));

        let mut config = valid_config();
        config.oauth.signing_key = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField("oauth.signing_key"))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = valid_config();
        config.server.base_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        config.server.base_url = "ftp://example.org".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = valid_config();
        config.oauth.session_ttl_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
