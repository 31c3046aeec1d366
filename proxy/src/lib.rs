pub mod config;
pub mod errors;
pub mod metrics_defs;
mod proxy_service;
mod routes;
mod upstreams;

use cache::{CacheManager, HttpUpstreamClient, Resolver};
pub use errors::ProxyError;
pub use proxy_service::ProxyService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;

/// Starts the cache and serves the proxy and admin listeners until one of
/// them fails.
pub async fn run(config: config::Config) -> Result<(), ProxyError> {
    config.validate()?;

    let client = HttpUpstreamClient::new()?;
    let manager = CacheManager::new(
        config.cache.clone(),
        config.upstreams.clone(),
        Arc::new(client),
    )?;
    manager.start();

    let probe = manager.clone();
    let proxy_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        ProxyService::new(Resolver::new(manager.clone())),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::new(move || probe.is_ready()),
    );

    let result = tokio::try_join!(proxy_task, admin_task);
    manager.stop().await;
    result?;
    Ok(())
}
