//! Cache of Mesos, Marathon and MesosDNS state with a background refresh
//! scheduler, and the resolver that turns it into upstream URLs.

pub mod config;
pub mod entry;
pub mod manager;
pub mod metrics_defs;
pub mod models;
pub mod resolver;
pub mod scheduler;
pub mod upstream;

#[cfg(test)]
mod testutils;

pub use entry::{CacheEntry, CacheError, EntryKind, Freshness, Trigger};
pub use manager::{CacheManager, ManagerError};
pub use resolver::{ResolutionError, ResolutionResult, Resolver, ServiceRoute, Source};
pub use scheduler::SchedulerState;
pub use upstream::{FetchError, HttpUpstreamClient, UpstreamClient};
