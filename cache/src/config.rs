use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("max_age_hard_limit ({hard}s) must be greater than max_age_soft_limit ({soft}s)")]
    HardLimitBelowSoftLimit { hard: u64, soft: u64 },
    #[error("max_age_soft_limit ({soft}s) must be greater than expiration ({expiration}s)")]
    SoftLimitBelowExpiration { soft: u64, expiration: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{key} must not exceed {max}s")]
    TooLarge { key: &'static str, max: u64 },
    #[error("{name} upstream must be an http(s) URL, got {url}")]
    UnsupportedScheme { name: &'static str, url: String },
}

// Ten years. Larger values overflow timer arithmetic.
const MAX_SECONDS: u64 = 315_360_000;

/// Timing parameters of the cache, all in seconds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CachePolicy {
    pub first_poll_delay: u64,
    pub poll_period: u64,
    pub expiration: u64,
    pub max_age_soft_limit: u64,
    pub max_age_hard_limit: u64,
    pub backend_request_timeout: u64,
    pub refresh_lock_timeout: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            first_poll_delay: 2,
            poll_period: 25,
            expiration: 20,
            max_age_soft_limit: 35,
            // 3 days
            max_age_hard_limit: 259_200,
            backend_request_timeout: 10,
            refresh_lock_timeout: 20,
        }
    }
}

impl CachePolicy {
    pub fn first_poll_delay(&self) -> Duration {
        Duration::from_secs(self.first_poll_delay)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period)
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration)
    }

    pub fn max_age_soft_limit(&self) -> Duration {
        Duration::from_secs(self.max_age_soft_limit)
    }

    pub fn max_age_hard_limit(&self) -> Duration {
        Duration::from_secs(self.max_age_hard_limit)
    }

    pub fn backend_request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_request_timeout)
    }

    pub fn refresh_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_lock_timeout)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_period == 0 {
            return Err(ValidationError::Zero("poll_period"));
        }
        if self.backend_request_timeout == 0 {
            return Err(ValidationError::Zero("backend_request_timeout"));
        }
        if self.refresh_lock_timeout == 0 {
            return Err(ValidationError::Zero("refresh_lock_timeout"));
        }
        for (key, value) in [
            ("first_poll_delay", self.first_poll_delay),
            ("poll_period", self.poll_period),
            ("expiration", self.expiration),
            ("max_age_soft_limit", self.max_age_soft_limit),
            ("max_age_hard_limit", self.max_age_hard_limit),
            ("backend_request_timeout", self.backend_request_timeout),
            ("refresh_lock_timeout", self.refresh_lock_timeout),
        ] {
            if value > MAX_SECONDS {
                return Err(ValidationError::TooLarge {
                    key,
                    max: MAX_SECONDS,
                });
            }
        }
        if self.max_age_hard_limit <= self.max_age_soft_limit {
            return Err(ValidationError::HardLimitBelowSoftLimit {
                hard: self.max_age_hard_limit,
                soft: self.max_age_soft_limit,
            });
        }
        if self.max_age_soft_limit <= self.expiration {
            return Err(ValidationError::SoftLimitBelowExpiration {
                soft: self.max_age_soft_limit,
                expiration: self.expiration,
            });
        }
        Ok(())
    }

    /// Overrides fields from `CACHE_*` variables. `lookup` is usually
    /// `|key| std::env::var(key).ok()`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let fields: [(&'static str, &mut u64); 7] = [
            ("CACHE_FIRST_POLL_DELAY", &mut self.first_poll_delay),
            ("CACHE_POLL_PERIOD", &mut self.poll_period),
            ("CACHE_EXPIRATION", &mut self.expiration),
            ("CACHE_MAX_AGE_SOFT_LIMIT", &mut self.max_age_soft_limit),
            ("CACHE_MAX_AGE_HARD_LIMIT", &mut self.max_age_hard_limit),
            (
                "CACHE_BACKEND_REQUEST_TIMEOUT",
                &mut self.backend_request_timeout,
            ),
            ("CACHE_REFRESH_LOCK_TIMEOUT", &mut self.refresh_lock_timeout),
        ];

        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue { key, value })?;
            }
        }
        Ok(())
    }
}

/// Base URLs of the upstream services.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Upstreams {
    pub mesos: Url,
    pub marathon: Url,
    pub mesos_dns: Url,
}

impl Default for Upstreams {
    fn default() -> Self {
        Upstreams {
            mesos: default_url("http://127.0.0.2:5050"),
            marathon: default_url("http://127.0.0.1:8080"),
            mesos_dns: default_url("http://127.0.0.1:8123"),
        }
    }
}

fn default_url(s: &str) -> Url {
    // Constant input, parsing cannot fail.
    Url::parse(s).unwrap_or_else(|_| unreachable!("invalid default URL {s}"))
}

impl Upstreams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, url) in [
            ("mesos", &self.mesos),
            ("marathon", &self.marathon),
            ("mesos_dns", &self.mesos_dns),
        ] {
            if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
                return Err(ValidationError::UnsupportedScheme {
                    name,
                    url: url.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Overrides the upstream URLs from `UPSTREAM_*` variables.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let fields: [(&'static str, &mut Url); 3] = [
            ("UPSTREAM_MESOS", &mut self.mesos),
            ("UPSTREAM_MARATHON", &mut self.marathon),
            ("UPSTREAM_MESOS_DNS", &mut self.mesos_dns),
        ];

        for (key, field) in fields {
            if let Some(value) = lookup(key) {
                *field = Url::parse(value.trim())
                    .map_err(|_| ConfigError::InvalidValue { key, value })?;
            }
        }
        Ok(())
    }
}
