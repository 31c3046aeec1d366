use crate::config::CachePolicy;
use crate::metrics_defs::{
    CACHE_FETCH_DURATION, CACHE_REFRESH_FAILURE, CACHE_REFRESH_SUCCESS, CACHE_STALE_SERVED,
    CACHE_TOO_OLD,
};
use crate::models::Decode;
use crate::upstream::{FetchError, UpstreamClient};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared::{counter, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};
use url::Url;

/// The upstream data an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    MesosState,
    ServiceApps,
    MarathonLeader,
    MesosDns,
}

impl EntryKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntryKind::MesosState => "mesosstate",
            EntryKind::ServiceApps => "svcapps",
            EntryKind::MarathonLeader => "marathonleader",
            EntryKind::MesosDns => "mesosdns",
        }
    }

    /// Upstream name used in refresh log lines.
    pub const fn upstream_name(&self) -> &'static str {
        match self {
            EntryKind::MesosState => "Mesos state",
            EntryKind::ServiceApps => "Marathon apps",
            EntryKind::MarathonLeader => "Marathon leader",
            EntryKind::MesosDns => "MesosDNS",
        }
    }

    /// Detail of the 503 reply sent when the entry cannot serve a request.
    pub const fn unavailable_detail(&self) -> &'static str {
        match self {
            EntryKind::MesosState => "invalid Mesos state cache",
            EntryKind::ServiceApps => "invalid Marathon svcapps cache",
            EntryKind::MarathonLeader => "invalid Marathon leader cache",
            EntryKind::MesosDns => "invalid MesosDNS cache",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Request,
}

/// Age class of a populated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Due for a timer refresh, still served as is.
    Expired,
    /// Past the soft limit. Served with a warning.
    Stale,
    /// Past the hard limit. Never served.
    TooOld,
}

impl Freshness {
    pub fn of(age: Duration, policy: &CachePolicy) -> Self {
        if age > policy.max_age_hard_limit() {
            Freshness::TooOld
        } else if age > policy.max_age_soft_limit() {
            Freshness::Stale
        } else if age >= policy.expiration() {
            Freshness::Expired
        } else {
            Freshness::Fresh
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("cache entry `{name}` is unavailable: {cause}")]
    Unavailable {
        kind: EntryKind,
        name: String,
        cause: String,
    },
    #[error("cache entry `{name}` is too old")]
    TooOld { kind: EntryKind, name: String },
}

impl CacheError {
    pub fn kind(&self) -> EntryKind {
        match self {
            CacheError::Unavailable { kind, .. } | CacheError::TooOld { kind, .. } => *kind,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("timed out waiting for the refresh lock")]
    LockTimeout,
    #[error("refresh task failed: {0}")]
    Task(String),
}

/// A value together with the time it was fetched. Readers always see both
/// halves of the same fetch.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub value: Arc<T>,
    pub fetched_at: Instant,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Snapshot {
            value: self.value.clone(),
            fetched_at: self.fetched_at,
        }
    }
}

impl<T> Snapshot<T> {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

struct EntryState<T> {
    snapshot: Option<Snapshot<T>>,
    // Completed fetch attempts. Lets a caller that waited on the refresh lock
    // tell whether someone else fetched in the meantime.
    attempts: u64,
    last_error: Option<FetchError>,
    last_attempt: Option<Instant>,
}

struct EntryInner<T> {
    name: String,
    kind: EntryKind,
    url: Url,
    client: Arc<dyn UpstreamClient>,
    policy: CachePolicy,
    state: RwLock<EntryState<T>>,
    refresh_lock: Arc<Mutex<()>>,
    fetch_in_progress: AtomicBool,
}

/// One cached upstream response. Cloning is cheap and clones share the
/// same storage.
pub struct CacheEntry<T> {
    inner: Arc<EntryInner<T>>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        CacheEntry {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Decode> CacheEntry<T> {
    pub fn new(
        name: impl Into<String>,
        kind: EntryKind,
        url: Url,
        client: Arc<dyn UpstreamClient>,
        policy: CachePolicy,
    ) -> Self {
        CacheEntry {
            inner: Arc::new(EntryInner {
                name: name.into(),
                kind,
                url,
                client,
                policy,
                state: RwLock::new(EntryState {
                    snapshot: None,
                    attempts: 0,
                    last_error: None,
                    last_attempt: None,
                }),
                refresh_lock: Arc::new(Mutex::new(())),
                fetch_in_progress: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> EntryKind {
        self.inner.kind
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn snapshot(&self) -> Option<Snapshot<T>> {
        self.inner.state.read().snapshot.clone()
    }

    pub fn freshness(&self) -> Option<Freshness> {
        self.snapshot()
            .map(|snapshot| Freshness::of(snapshot.age(), &self.inner.policy))
    }

    pub fn fetch_in_progress(&self) -> bool {
        self.inner.fetch_in_progress.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<FetchError> {
        self.inner.state.read().last_error.clone()
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.inner.state.read().last_attempt
    }

    /// Returns the cached value, fetching it first when the entry is empty.
    pub async fn get(&self) -> Result<Arc<T>, CacheError> {
        let (mut snapshot, seen) = {
            let state = self.inner.state.read();
            (state.snapshot.clone(), state.attempts)
        };

        if snapshot.is_none() {
            tracing::info!("Cache `{}` empty. Fetching.", self.name());
            if let Err(err) = self.refresh_since(Trigger::Request, seen).await {
                tracing::debug!(entry = self.name(), error = %err, "Refresh on request failed");
            }
            snapshot = self.snapshot();
        } else if self.fetch_in_progress()
            && self.freshness() == Some(Freshness::TooOld)
        {
            // A refresh already running may still rescue this request.
            let _ = timeout(
                self.inner.policy.refresh_lock_timeout(),
                self.inner.refresh_lock.lock(),
            )
            .await;
            snapshot = self.snapshot();
        }

        match snapshot {
            Some(snapshot) => self.serve(snapshot),
            None => Err(CacheError::Unavailable {
                kind: self.kind(),
                name: self.name().to_string(),
                cause: self
                    .last_error()
                    .map(|err| err.to_string())
                    .unwrap_or_else(|| "no data".to_string()),
            }),
        }
    }

    fn serve(&self, snapshot: Snapshot<T>) -> Result<Arc<T>, CacheError> {
        match Freshness::of(snapshot.age(), &self.inner.policy) {
            Freshness::Fresh | Freshness::Expired => Ok(snapshot.value),
            Freshness::Stale => {
                tracing::warn!(
                    "Using stale `{}` cache entry to fulfill the request",
                    self.name()
                );
                counter!(CACHE_STALE_SERVED, "entry" => self.kind().as_str()).increment(1);
                self.spawn_refresh();
                Ok(snapshot.value)
            }
            Freshness::TooOld => {
                tracing::error!(
                    "Cache entry `{}` is too old, aborting request",
                    self.name()
                );
                counter!(CACHE_TOO_OLD, "entry" => self.kind().as_str()).increment(1);
                Err(CacheError::TooOld {
                    kind: self.kind(),
                    name: self.name().to_string(),
                })
            }
        }
    }

    fn spawn_refresh(&self) {
        if self.fetch_in_progress() {
            return;
        }
        let entry = self.clone();
        tokio::spawn(async move {
            let _ = entry.refresh(Trigger::Request).await;
        });
    }

    /// Fetches from the upstream unless another caller is already doing so,
    /// in which case this waits for that fetch and shares its outcome.
    pub async fn refresh(&self, trigger: Trigger) -> Result<(), RefreshError> {
        let seen = self.inner.state.read().attempts;
        self.refresh_since(trigger, seen).await
    }

    // `seen` is the attempt count the caller based its decision on. A fetch
    // that completed after that point is shared instead of repeated.
    async fn refresh_since(&self, trigger: Trigger, seen: u64) -> Result<(), RefreshError> {
        let guard = timeout(
            self.inner.policy.refresh_lock_timeout(),
            self.inner.refresh_lock.clone().lock_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(entry = self.name(), "Timed out waiting for the refresh lock");
            RefreshError::LockTimeout
        })?;

        {
            let state = self.inner.state.read();
            if state.attempts != seen {
                return match &state.last_error {
                    Some(err) => Err(err.clone().into()),
                    None => Ok(()),
                };
            }
        }

        if trigger == Trigger::Request {
            tracing::info!("Executing cache refresh triggered by request");
        }

        // Detached so a caller that goes away does not cancel the fetch.
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.fetch_and_store().await
        });

        match task.await {
            Ok(result) => result.map_err(RefreshError::from),
            Err(err) => Err(RefreshError::Task(err.to_string())),
        }
    }
}

impl<T: Decode> EntryInner<T> {
    async fn fetch_and_store(&self) -> Result<(), FetchError> {
        self.fetch_in_progress.store(true, Ordering::Release);
        let started = Instant::now();

        let request_timeout = self.policy.backend_request_timeout();
        let result = match timeout(request_timeout, self.client.fetch(&self.url, request_timeout))
            .await
        {
            Ok(Ok(body)) => T::decode(&body),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(FetchError::Timeout),
        };

        histogram!(CACHE_FETCH_DURATION, "entry" => self.kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let now = Instant::now();
        let outcome = {
            let mut state = self.state.write();
            state.attempts += 1;
            state.last_attempt = Some(now);
            match result {
                Ok(value) => {
                    state.snapshot = Some(Snapshot {
                        value: Arc::new(value),
                        fetched_at: now,
                    });
                    state.last_error = None;
                    Ok(())
                }
                Err(err) => {
                    state.last_error = Some(err.clone());
                    Err(err)
                }
            }
        };
        self.fetch_in_progress.store(false, Ordering::Release);

        match &outcome {
            Ok(()) => {
                tracing::info!(
                    "{} cache has been successfully updated",
                    self.kind.upstream_name()
                );
                counter!(CACHE_REFRESH_SUCCESS, "entry" => self.kind.as_str()).increment(1);
            }
            Err(err) => {
                tracing::error!("{} request failed: {}", self.kind.upstream_name(), err);
                counter!(CACHE_REFRESH_FAILURE, "entry" => self.kind.as_str()).increment(1);
            }
        }

        outcome
    }
}

/// Type-erased view of an entry used by the refresh scheduler.
#[async_trait]
pub trait Refreshable: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> EntryKind;

    fn is_populated(&self) -> bool;

    /// Refreshes the entry if it is empty or has reached its expiration.
    /// Returns `None` when nothing had to be done.
    async fn refresh_if_due(&self) -> Option<Result<(), RefreshError>>;
}

#[async_trait]
impl<T: Decode> Refreshable for CacheEntry<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn kind(&self) -> EntryKind {
        self.inner.kind
    }

    fn is_populated(&self) -> bool {
        self.inner.state.read().snapshot.is_some()
    }

    async fn refresh_if_due(&self) -> Option<Result<(), RefreshError>> {
        let (freshness, seen) = {
            let state = self.inner.state.read();
            let freshness = state
                .snapshot
                .as_ref()
                .map(|snapshot| Freshness::of(snapshot.age(), &self.inner.policy));
            (freshness, state.attempts)
        };
        match freshness {
            Some(Freshness::Fresh) => return None,
            Some(_) => tracing::info!("Cache `{}` expired. Refresh.", self.inner.name),
            None => tracing::info!("Cache `{}` empty. Fetching.", self.inner.name),
        }
        Some(self.refresh_since(Trigger::Timer, seen).await)
    }
}
