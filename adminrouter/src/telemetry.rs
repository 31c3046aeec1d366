use crate::config::CommonConfig;
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "adminrouter";

/// Installs the log subscriber, Sentry and the statsd recorder. The returned
/// guard flushes pending Sentry events when dropped.
pub fn init(config: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let sentry_guard = config.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            sentry_guard
                .is_some()
                .then(|| sentry::integrations::tracing::layer()),
        )
        .init();

    if let Some(metrics) = &config.metrics {
        match StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
            .build(Some(METRICS_PREFIX))
        {
            Ok(recorder) => {
                if metrics::set_global_recorder(recorder).is_err() {
                    tracing::warn!("Metrics recorder already installed");
                }
            }
            Err(err) => tracing::error!(error = %err, "Cannot set up statsd metrics"),
        }
    }

    sentry_guard
}
