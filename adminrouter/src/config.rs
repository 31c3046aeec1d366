use proxy::config::Config as ProxyConfig;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Reads the file if one is given, applies the environment overrides
    /// and validates the result.
    pub fn load(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.proxy.apply_env_overrides(lookup)?;
        config.proxy.validate()?;
        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error(transparent)]
    Override(#[from] cache::config::ConfigError),
    #[error("invalid config: {0}")]
    Invalid(#[from] proxy::config::ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            proxy:
                listener:
                    host: 0.0.0.0
                    port: 80
                admin_listener:
                    host: 127.0.0.1
                    port: 8001
                upstreams:
                    mesos: http://leader.mesos:5050
                cache:
                    poll_period: 5
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::load(Some(tmp.path()), no_env).expect("load config");

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(config.proxy.listener.port, 80);
        assert_eq!(
            config.proxy.upstreams.mesos.as_str(),
            "http://leader.mesos:5050/"
        );
        assert_eq!(config.proxy.cache.poll_period, 5);
        assert_eq!(config.proxy.cache.expiration, 20);
    }

    #[test]
    fn defaults_without_file() {
        let config = Config::load(None, no_env).expect("default config");
        assert_eq!(config, Config::default());
        assert!(config.common.logging.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let tmp = write_tmp_file("proxy:\n  cache:\n    poll_period: 5\n");
        let config = Config::load(Some(tmp.path()), |key| match key {
            "CACHE_POLL_PERIOD" => Some("7".into()),
            "UPSTREAM_MARATHON" => Some("http://10.0.0.3:8080".into()),
            _ => None,
        })
        .expect("load config");
        assert_eq!(config.proxy.cache.poll_period, 7);
        assert_eq!(
            config.proxy.upstreams.marathon.host_str(),
            Some("10.0.0.3")
        );
    }

    #[test]
    fn invalid_configs() {
        assert!(matches!(
            Config::load(Some(Path::new("/nonexistent/adminrouter.yaml")), no_env),
            Err(ConfigError::LoadError(_))
        ));

        let tmp = write_tmp_file("proxy: [1, 2]\n");
        assert!(matches!(
            Config::load(Some(tmp.path()), no_env),
            Err(ConfigError::ParseError(_))
        ));

        let tmp = write_tmp_file("proxy:\n  cache:\n    expiration: 40\n");
        assert!(matches!(
            Config::load(Some(tmp.path()), no_env),
            Err(ConfigError::Invalid(_))
        ));

        assert!(matches!(
            Config::load(None, |key| (key == "CACHE_EXPIRATION").then(|| "soon".into())),
            Err(ConfigError::Override(_))
        ));
    }
}
