#[derive(Debug, Clone)]
pub struct Config {
    // Management API
    pub api_key: String,
    pub api_domain: String,

    // Registry storage
    pub db_path: String,

    // Listener
    pub port: u16,
    pub listen_host: String,
    pub debug: bool,

    // Outbound and lifecycle
    pub backend_connect_timeout_secs: u64,
    pub shutdown_drain_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_domain: String::new(),
            db_path: "data/proxy.db".to_string(),
            port: 80,
            listen_host: "0.0.0.0".to_string(),
            debug: false,
            backend_connect_timeout_secs: 10,
            shutdown_drain_secs: 30,
        }
    }
}

/// A required setting is missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("PROXY_API_KEY environment variable is required")]
    MissingApiKey,
    #[error("PROXY_API_DOMAIN environment variable is required")]
    MissingApiDomain,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.api_domain.is_empty() {
            return Err(ConfigError::MissingApiDomain);
        }
        Ok(())
    }

    /// `host:port` for the listener, bracketing IPv6 hosts.
    pub fn listen_addr(&self) -> String {
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.port)
        } else {
            format!("{}:{}", self.listen_host, self.port)
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

pub fn load_config() -> anyhow::Result<Config> {
    let defaults = Config::default();

    let api_key = std::env::var("PROXY_API_KEY").unwrap_or_default();
    let api_domain = std::env::var("PROXY_API_DOMAIN").unwrap_or_default();

    let db_path = env_or("DB_PATH", &defaults.db_path);

    // Port 0 would bind an ephemeral port; treat it like any other bad value.
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "80".to_string())
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .unwrap_or(defaults.port);

    let listen_host = env_or("LISTEN_HOST", &defaults.listen_host);

    let debug = env_flag("DEBUG");

    let backend_connect_timeout_secs = std::env::var("BACKEND_CONNECT_TIMEOUT_SECS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .unwrap_or(defaults.backend_connect_timeout_secs);

    let shutdown_drain_secs = std::env::var("SHUTDOWN_DRAIN_SECS")
        .unwrap_or_else(|_| "30".to_string())
        .parse()
        .unwrap_or(defaults.shutdown_drain_secs);

    Ok(Config {
        api_key,
        api_domain,
        db_path,
        port,
        listen_host,
        debug,
        backend_connect_timeout_secs,
        shutdown_drain_secs,
    })
}
