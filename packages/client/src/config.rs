//! Environment configuration for the realtime transport and the backend API.

use std::time::Duration;

use crate::error::ClientError;

/// Environment variable holding the transport host
pub const ENV_HOST: &str = "SOKETI_APP_HOST";
/// Environment variable holding the transport key
pub const ENV_KEY: &str = "SOKETI_APP_KEY";
/// Environment variable holding the app identifier
pub const ENV_APP_ID: &str = "SOKETI_APP_ID";
/// Environment variable holding the transport port
pub const ENV_PORT: &str = "SOKETI_PORT";
/// Environment variable toggling TLS
pub const ENV_USE_TLS: &str = "SOKETI_USE_TLS";
/// Environment variable naming the build flavour
pub const ENV_APP_ENV: &str = "APP_ENV";
/// Environment variable holding the backend base URL
pub const ENV_API_URL: &str = "API_URL";

/// Default app identifier when none is configured
pub const DEFAULT_APP_ID: &str = "1";
/// Default transport port
pub const DEFAULT_PORT: u16 = 443;
/// Default backend base URL
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Time allowed for a pong after a keep-alive ping
pub const PONG_TIMEOUT: Duration = Duration::from_secs(30);
/// Silence after which the client pings the server
pub const ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound for the reconnect backoff
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Realtime transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub host: Option<String>,
    pub key: Option<String>,
    pub app_id: String,
    pub port: u16,
    pub use_tls: bool,
    /// Production builds log less; behavior is identical
    pub production: bool,
    pub pong_timeout: Duration,
    pub activity_timeout: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            host: None,
            key: None,
            app_id: DEFAULT_APP_ID.to_string(),
            port: DEFAULT_PORT,
            use_tls: true,
            production: false,
            pong_timeout: PONG_TIMEOUT,
            activity_timeout: ACTIVITY_TIMEOUT,
            max_reconnect_delay: MAX_RECONNECT_DELAY,
        }
    }
}

impl RealtimeConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            host: present(ENV_HOST),
            key: present(ENV_KEY),
            app_id: present(ENV_APP_ID).unwrap_or(defaults.app_id),
            port: present(ENV_PORT)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(defaults.port),
            use_tls: present(ENV_USE_TLS)
                .map(|value| !matches!(value.trim(), "0" | "false" | "no"))
                .unwrap_or(defaults.use_tls),
            production: present(ENV_APP_ENV)
                .map(|value| value.trim().eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            ..defaults
        }
    }

    /// Extract the transport credentials
    ///
    /// Fails with `ClientError::Configuration` when host or key is absent.
    pub fn credentials(&self) -> Result<Credentials, ClientError> {
        Credentials::new(self.host.as_deref(), self.key.as_deref(), &self.app_id)
            .map(|credentials| credentials.with_endpoint(self.port, self.use_tls))
    }
}

/// Host/key credentials used to open the realtime connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub key: String,
    pub app_id: String,
    pub port: u16,
    pub use_tls: bool,
}

impl Credentials {
    /// Validate and build credentials
    ///
    /// Blank values count as missing.
    pub fn new(host: Option<&str>, key: Option<&str>, app_id: &str) -> Result<Self, ClientError> {
        let host = host.map(str::trim).filter(|h| !h.is_empty());
        let key = key.map(str::trim).filter(|k| !k.is_empty());

        match (host, key) {
            (Some(host), Some(key)) => Ok(Self {
                host: host.to_string(),
                key: key.to_string(),
                app_id: app_id.to_string(),
                port: DEFAULT_PORT,
                use_tls: true,
            }),
            (None, None) => Err(ClientError::Configuration(
                "missing transport host and key".to_string(),
            )),
            (None, _) => Err(ClientError::Configuration(
                "missing transport host".to_string(),
            )),
            (_, None) => Err(ClientError::Configuration(
                "missing transport key".to_string(),
            )),
        }
    }

    /// Override port and TLS settings
    pub fn with_endpoint(mut self, port: u16, use_tls: bool) -> Self {
        self.port = port;
        self.use_tls = use_tls;
        self
    }
}

/// Backend API configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
        }
    }
}

impl ApiConfig {
    /// Read the backend URL from the environment
    pub fn from_env() -> Self {
        std::env::var(ENV_API_URL)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|base_url| Self { base_url })
            .unwrap_or_default()
    }
}
