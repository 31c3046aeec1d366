//! Maps service names, agent IDs and the Marathon leader to upstream URLs
//! using the cached Marathon, Mesos and MesosDNS data.
//!
//! A service name is looked up in this order, the first hit wins:
//! 1. Marathon apps carrying `DCOS_SERVICE_*` labels
//! 2. Mesos framework with that ID and a web UI
//! 3. Mesos framework with that name and a web UI
//! 4. MesosDNS SRV record for the Marathon app
//!
//! An unusable cache at any layer aborts the lookup instead of falling
//! through to the next one. For nested `/service/` paths a broken MesosDNS
//! entry only ends the walk if no longer prefix resolves.

use crate::entry::{CacheError, EntryKind};
use crate::manager::CacheManager;
use crate::metrics_defs::RESOLUTION;
use crate::models::mesos::Framework;
use shared::counter;

/// Frameworks that are looked up in Mesos directly, so a broken Marathon
/// does not make Marathon itself unreachable.
pub const ROOT_FRAMEWORKS: &[&str] = &["marathon", "metronome"];

/// Deepest nested service name tried for a `/service/` path.
pub const MAX_SERVICE_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    MarathonApps,
    MesosFrameworkId,
    MesosFrameworkName,
    MesosDns,
    None,
}

impl Source {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Source::MarathonApps => "marathon_apps",
            Source::MesosFrameworkId => "mesos_framework_id",
            Source::MesosFrameworkName => "mesos_framework_name",
            Source::MesosDns => "mesos_dns",
            Source::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    pub upstream_url: Option<String>,
    pub source: Source,
}

impl ResolutionResult {
    fn found(upstream_url: impl Into<String>, source: Source) -> Self {
        ResolutionResult {
            upstream_url: Some(upstream_url.into()),
            source,
        }
    }

    fn not_found() -> Self {
        ResolutionResult {
            upstream_url: None,
            source: Source::None,
        }
    }
}

/// A `/service/` path split into the service it names and the remainder
/// to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoute {
    pub service_name: String,
    pub upstream_url: String,
    pub source: Source,
    /// Always starts with `/`.
    pub path: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("service `{0}` not found")]
    ServiceNotFound(String),
    #[error("agent `{0}` not found")]
    AgentNotFound(String),
    #[error("invalid service name `{0}`")]
    InvalidServiceName(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Clone)]
pub struct Resolver {
    cache: CacheManager,
}

impl Resolver {
    pub fn new(cache: CacheManager) -> Self {
        Resolver { cache }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Resolves a single service name. Not finding the service is not an
    /// error, the result then has `Source::None`.
    pub async fn resolve(&self, service_name: &str) -> Result<ResolutionResult, ResolutionError> {
        let result = self.lookup(service_name).await?;

        counter!(RESOLUTION, "source" => result.source.as_str()).increment(1);
        tracing::debug!(
            service = service_name,
            source = result.source.as_str(),
            upstream = ?result.upstream_url,
            "Service resolved"
        );
        Ok(result)
    }

    async fn lookup(&self, service_name: &str) -> Result<ResolutionResult, ResolutionError> {
        if !ROOT_FRAMEWORKS.contains(&service_name) {
            let apps = self.cache.service_apps().get().await?;
            if let Some(url) = apps.get(service_name) {
                return Ok(ResolutionResult::found(url, Source::MarathonApps));
            }
        }

        let state = self.cache.mesos_state().get().await?;
        if let Some(url) = state
            .framework_by_id(service_name)
            .and_then(Framework::webui_url)
        {
            return Ok(ResolutionResult::found(url, Source::MesosFrameworkId));
        }
        if let Some(url) = state
            .framework_by_name(service_name)
            .and_then(Framework::webui_url)
        {
            return Ok(ResolutionResult::found(url, Source::MesosFrameworkName));
        }

        let records = self
            .cache
            .mesos_dns(service_name)
            .map_err(|_| ResolutionError::InvalidServiceName(service_name.to_string()))?
            .get()
            .await?;
        if let Some(url) = records.first_upstream() {
            return Ok(ResolutionResult::found(url, Source::MesosDns));
        }

        Ok(ResolutionResult::not_found())
    }

    /// Resolves the part of a request path that follows `/service/`. Nested
    /// names are tried from the shortest prefix up, `a`, then `a/b`, and so
    /// on, up to `MAX_SERVICE_DEPTH` segments.
    pub async fn resolve_service_path(&self, path: &str) -> Result<ServiceRoute, ResolutionError> {
        let segments: Vec<&str> = path.split('/').collect();
        // First MesosDNS failure, reported only when no prefix resolves.
        let mut mesos_dns_error = None;

        for depth in 1..=segments.len().min(MAX_SERVICE_DEPTH) {
            if segments[depth - 1].is_empty() {
                break;
            }

            let service_name = segments[..depth].join("/");
            let result = match self.resolve(&service_name).await {
                Ok(result) => result,
                Err(ResolutionError::Cache(err)) if err.kind() == EntryKind::MesosDns => {
                    tracing::debug!(
                        service = %service_name,
                        error = %err,
                        "MesosDNS unusable, trying a longer service name"
                    );
                    mesos_dns_error.get_or_insert(err);
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(upstream_url) = result.upstream_url {
                return Ok(ServiceRoute {
                    service_name,
                    upstream_url,
                    source: result.source,
                    path: format!("/{}", segments[depth..].join("/")),
                });
            }
        }

        match mesos_dns_error {
            Some(err) => Err(err.into()),
            None => Err(ResolutionError::ServiceNotFound(
                path.trim_end_matches('/').to_string(),
            )),
        }
    }

    /// Address of a Mesos agent, taken from its libprocess pid.
    pub async fn resolve_agent(&self, agent_id: &str) -> Result<String, ResolutionError> {
        let state = self.cache.mesos_state().get().await?;
        state
            .agent(agent_id)
            .and_then(|agent| agent.upstream_url())
            .ok_or_else(|| ResolutionError::AgentNotFound(agent_id.to_string()))
    }

    pub async fn resolve_marathon_leader(&self) -> Result<String, ResolutionError> {
        let leader = self.cache.marathon_leader().get().await?;
        Ok(leader.upstream_url())
    }
}
