use cache::config::{CachePolicy, ConfigError, Upstreams};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener share {0}")]
    SharedListener(String),

    #[error(transparent)]
    Cache(#[from] cache::config::ValidationError),
}

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for proxied requests
    #[serde(default = "Listener::proxy_default")]
    pub listener: Listener,
    /// Listener serving `/health` and `/ready`
    #[serde(default = "Listener::admin_default")]
    pub admin_listener: Listener,
    /// Mesos, Marathon and MesosDNS base URLs
    #[serde(default)]
    pub upstreams: Upstreams,
    /// Refresh timing and age limits of the cache
    #[serde(default)]
    pub cache: CachePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::proxy_default(),
            admin_listener: Listener::admin_default(),
            upstreams: Upstreams::default(),
            cache: CachePolicy::default(),
        }
    }
}

impl Config {
    /// Validates the proxy configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener == self.admin_listener {
            return Err(ValidationError::SharedListener(format!(
                "{}:{}",
                self.listener.host, self.listener.port
            )));
        }

        self.upstreams.validate()?;
        self.cache.validate()?;
        Ok(())
    }

    /// Applies the `UPSTREAM_*` and `CACHE_*` overrides.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        self.upstreams.apply_env_overrides(&lookup)?;
        self.cache.apply_env_overrides(&lookup)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    fn proxy_default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }

    fn admin_default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8001,
        }
    }

    /// Validates the listener configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}
