use crate::config::{CachePolicy, Upstreams};
use crate::entry::{CacheEntry, EntryKind, Refreshable};
use crate::metrics_defs::CACHE_ENTRIES;
use crate::models::marathon::{MarathonLeader, ServiceApps};
use crate::models::mesos::MesosState;
use crate::models::mesos_dns::{SrvRecords, srv_name};
use crate::scheduler::{Command, Scheduler, SchedulerState};
use crate::upstream::UpstreamClient;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use shared::gauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const MESOS_STATE_PATH: &str = "/master/state-summary";
const MARATHON_APPS_PATH: &str = "/v2/apps?embed=apps.tasks&label=DCOS_SERVICE_NAME";
const MARATHON_LEADER_PATH: &str = "/v2/leader";

// Beyond this many per-service MesosDNS entries, lookups still work but the
// result is not kept.
const MAX_MESOS_DNS_ENTRIES: usize = 1024;

// A MesosDNS entry nobody looked up for this many poll periods is dropped.
const MESOS_DNS_IDLE_POLLS: u32 = 4;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ManagerError {
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("the refresh scheduler is not running")]
    NotRunning,
}

struct MesosDnsSlot {
    entry: CacheEntry<SrvRecords>,
    last_used: Mutex<Instant>,
}

/// Entries the scheduler walks on every tick: the core entries, which are
/// always kept, followed by the MesosDNS entries in creation order.
pub(crate) struct Registry {
    core: Vec<Arc<dyn Refreshable>>,
    mesos_dns: RwLock<IndexMap<String, MesosDnsSlot>>,
    idle_timeout: Duration,
}

impl Registry {
    fn new(core: Vec<Arc<dyn Refreshable>>, idle_timeout: Duration) -> Self {
        gauge!(CACHE_ENTRIES).set(core.len() as f64);
        Registry {
            core,
            mesos_dns: RwLock::new(IndexMap::new()),
            idle_timeout,
        }
    }

    pub(crate) fn entries(&self) -> Vec<Arc<dyn Refreshable>> {
        let mesos_dns = self.mesos_dns.read();
        let mut entries = self.core.clone();
        entries.extend(
            mesos_dns
                .values()
                .map(|slot| Arc::new(slot.entry.clone()) as Arc<dyn Refreshable>),
        );
        entries
    }

    /// Drops MesosDNS entries that were not looked up within the idle
    /// timeout.
    pub(crate) fn evict_idle(&self) {
        let now = Instant::now();
        let mut mesos_dns = self.mesos_dns.write();
        let before = mesos_dns.len();
        mesos_dns.retain(|_, slot| now.duration_since(*slot.last_used.lock()) <= self.idle_timeout);

        let evicted = before - mesos_dns.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Dropped idle MesosDNS cache entries");
            gauge!(CACHE_ENTRIES).set((self.core.len() + mesos_dns.len()) as f64);
        }
    }

    fn len(&self) -> usize {
        self.core.len() + self.mesos_dns.read().len()
    }
}

struct Worker {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

struct ManagerInner {
    policy: CachePolicy,
    upstreams: Upstreams,
    client: Arc<dyn UpstreamClient>,
    mesos_state: CacheEntry<MesosState>,
    service_apps: CacheEntry<ServiceApps>,
    marathon_leader: CacheEntry<MarathonLeader>,
    registry: Arc<Registry>,
    state: Arc<RwLock<SchedulerState>>,
    worker: Mutex<Option<Worker>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.handle.abort();
        }
    }
}

/// Owns every cache entry and the scheduler that keeps them fresh. Several
/// managers can live in one process without sharing anything.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

impl CacheManager {
    pub fn new(
        policy: CachePolicy,
        upstreams: Upstreams,
        client: Arc<dyn UpstreamClient>,
    ) -> Result<Self, ManagerError> {
        let mesos_state = CacheEntry::new(
            "mesosstate",
            EntryKind::MesosState,
            upstreams.mesos.join(MESOS_STATE_PATH)?,
            client.clone(),
            policy.clone(),
        );
        let service_apps = CacheEntry::new(
            "svcapps",
            EntryKind::ServiceApps,
            upstreams.marathon.join(MARATHON_APPS_PATH)?,
            client.clone(),
            policy.clone(),
        );
        let marathon_leader = CacheEntry::new(
            "marathonleader",
            EntryKind::MarathonLeader,
            upstreams.marathon.join(MARATHON_LEADER_PATH)?,
            client.clone(),
            policy.clone(),
        );

        let registry = Arc::new(Registry::new(
            vec![
                Arc::new(mesos_state.clone()),
                Arc::new(service_apps.clone()),
                Arc::new(marathon_leader.clone()),
            ],
            policy.poll_period().saturating_mul(MESOS_DNS_IDLE_POLLS),
        ));

        Ok(CacheManager {
            inner: Arc::new(ManagerInner {
                policy,
                upstreams,
                client,
                mesos_state,
                service_apps,
                marathon_leader,
                registry,
                state: Arc::new(RwLock::new(SchedulerState::Uninitialized)),
                worker: Mutex::new(None),
            }),
        })
    }

    pub fn mesos_state(&self) -> &CacheEntry<MesosState> {
        &self.inner.mesos_state
    }

    pub fn service_apps(&self) -> &CacheEntry<ServiceApps> {
        &self.inner.service_apps
    }

    pub fn marathon_leader(&self) -> &CacheEntry<MarathonLeader> {
        &self.inner.marathon_leader
    }

    /// Entry holding the MesosDNS SRV records of `service_name`, created and
    /// registered with the scheduler on first use. Every call counts as a
    /// use for idle eviction.
    pub fn mesos_dns(&self, service_name: &str) -> Result<CacheEntry<SrvRecords>, ManagerError> {
        let srv = srv_name(service_name);
        let registry = &self.inner.registry;
        if let Some(slot) = registry.mesos_dns.read().get(&srv) {
            *slot.last_used.lock() = Instant::now();
            return Ok(slot.entry.clone());
        }

        let mut entries = registry.mesos_dns.write();
        if let Some(slot) = entries.get(&srv) {
            *slot.last_used.lock() = Instant::now();
            return Ok(slot.entry.clone());
        }

        let url = self
            .inner
            .upstreams
            .mesos_dns
            .join(&format!("/v1/services/{srv}"))?;
        let entry = CacheEntry::new(
            format!("mesosdns:{srv}"),
            EntryKind::MesosDns,
            url,
            self.inner.client.clone(),
            self.inner.policy.clone(),
        );

        if entries.len() >= MAX_MESOS_DNS_ENTRIES {
            tracing::debug!(srv, "MesosDNS entry limit reached, not caching");
            return Ok(entry);
        }

        entries.insert(
            srv,
            MesosDnsSlot {
                entry: entry.clone(),
                last_used: Mutex::new(Instant::now()),
            },
        );
        gauge!(CACHE_ENTRIES).set((registry.core.len() + entries.len()) as f64);
        Ok(entry)
    }

    /// Number of entries the scheduler refreshes.
    pub fn entry_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Spawns the refresh scheduler. Calling it again, or after `stop`, does
    /// nothing.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock();
        {
            let mut state = self.inner.state.write();
            if *state != SchedulerState::Uninitialized {
                return;
            }
            *state = SchedulerState::WarmingUp;
        }

        let (tx, rx) = mpsc::channel::<Command>(16);
        let scheduler = Scheduler {
            policy: self.inner.policy.clone(),
            registry: self.inner.registry.clone(),
            state: self.inner.state.clone(),
        };
        let handle = tokio::spawn(scheduler.run(rx));
        *worker = Some(Worker { tx, handle });
        tracing::info!(
            first_poll_delay = self.inner.policy.first_poll_delay,
            poll_period = self.inner.policy.poll_period,
            "Cache refresh scheduler started"
        );
    }

    /// Signals the scheduler and waits for it to exit. A refresh pass that
    /// is already running is allowed to finish.
    pub async fn stop(&self) {
        let worker = self.inner.worker.lock().take();
        if let Some(Worker { tx, handle }) = worker {
            let _ = tx.send(Command::Shutdown).await;
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Scheduler task did not exit cleanly");
            }
        }
        *self.inner.state.write() = SchedulerState::Stopped;
    }

    /// Runs a refresh pass now and waits for it to finish.
    pub async fn refresh_now(&self) -> Result<(), ManagerError> {
        let tx = match self.inner.worker.lock().as_ref() {
            Some(worker) => worker.tx.clone(),
            None => return Err(ManagerError::NotRunning),
        };

        let (done_tx, done_rx) = oneshot::channel();
        tx.send(Command::Refresh(done_tx))
            .await
            .map_err(|_| ManagerError::NotRunning)?;
        done_rx.await.map_err(|_| ManagerError::NotRunning)
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.read()
    }

    /// True once the first scheduler pass ran or every core entry holds a
    /// value.
    pub fn is_ready(&self) -> bool {
        self.state() == SchedulerState::SteadyState
            || (self.inner.mesos_state.is_populated()
                && self.inner.service_apps.is_populated()
                && self.inner.marathon_leader.is_populated())
    }
}
