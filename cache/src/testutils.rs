use crate::config::CachePolicy;
use crate::upstream::{FetchError, UpstreamClient};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use url::Url;

#[derive(Clone, Debug)]
pub enum MockResponse {
    Body(Bytes),
    Status(u16),
    /// Never answers, the caller's timeout fires.
    Stall,
}

/// In-memory upstream keyed by URL path. Unknown paths answer with the
/// fallback, 404 unless set.
#[derive(Default)]
pub struct MockUpstream {
    responses: Mutex<HashMap<String, MockResponse>>,
    fallback: Mutex<Option<MockResponse>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Duration>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, path: &str, response: MockResponse) {
        self.responses.lock().insert(path.to_string(), response);
    }

    pub fn set_json(&self, path: &str, value: serde_json::Value) {
        self.set(path, MockResponse::Body(Bytes::from(value.to_string())));
    }

    pub fn set_fallback(&self, response: MockResponse) {
        *self.fallback.lock() = Some(response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Bytes, FetchError> {
        let path = url.path().to_string();
        *self.calls.lock().entry(path.clone()).or_default() += 1;

        let response = self
            .responses
            .lock()
            .get(&path)
            .cloned()
            .or_else(|| self.fallback.lock().clone());
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match response {
            Some(MockResponse::Body(body)) => Ok(body),
            Some(MockResponse::Status(code)) => Err(FetchError::Status(code)),
            Some(MockResponse::Stall) => {
                tokio::time::sleep(timeout * 2).await;
                Err(FetchError::Timeout)
            }
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Policy with the given age thresholds in seconds and default timeouts.
pub fn policy(expiration: u64, soft: u64, hard: u64) -> CachePolicy {
    CachePolicy {
        expiration,
        max_age_soft_limit: soft,
        max_age_hard_limit: hard,
        ..Default::default()
    }
}

pub const MESOS_STATE_PATH: &str = "/master/state-summary";
pub const MARATHON_APPS_PATH: &str = "/v2/apps";
pub const MARATHON_LEADER_PATH: &str = "/v2/leader";

pub const ALWAYSTHERE_FRAMEWORK_ID: &str = "819ffe78-8d7c-4fd5-9a4b-2ad46f7bc2c7-0001";
pub const AGENT_ID: &str = "de1baf83-c36c-4d23-9cb0-f89f596cd6ab-S1";

pub fn framework_json(id: &str, name: &str, webui_url: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "webui_url": webui_url,
        "active": true,
    })
}

pub fn mesos_state_json(frameworks: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({
        "hostname": "127.0.0.2",
        "frameworks": frameworks,
        "slaves": [{
            "id": AGENT_ID,
            "hostname": "127.0.0.2",
            "pid": "slave(1)@127.0.0.2:15001",
        }],
    })
}

pub fn apps_json(apps: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "apps": apps })
}

/// What MesosDNS answers for a service it does not know.
pub fn empty_srv_json() -> serde_json::Value {
    serde_json::json!([{"service": "", "host": "", "ip": "", "port": ""}])
}

pub fn srv_json(srv_name: &str, ip: &str, port: u16) -> serde_json::Value {
    serde_json::json!([{
        "service": srv_name,
        "host": "scheduler-alwaysthere-74b1w-s1.marathon.mesos.",
        "ip": ip,
        "port": port.to_string(),
    }])
}

/// Upstream answering every core entry: an app on 127.0.0.1:16000, the
/// Marathon and Metronome frameworks and a framework with a web UI on
/// 127.0.0.15:16001.
pub fn populated_upstream() -> Arc<MockUpstream> {
    let upstream = MockUpstream::new();
    upstream.set_json(
        MESOS_STATE_PATH,
        mesos_state_json(vec![
            framework_json("fw-marathon", "marathon", "http://127.0.0.1:8080"),
            framework_json("fw-metronome", "metronome", "http://127.0.0.1:9000"),
            framework_json(
                ALWAYSTHERE_FRAMEWORK_ID,
                "scheduler-alwaysthere",
                "http://127.0.0.15:16001",
            ),
        ]),
    );
    upstream.set_json(
        MARATHON_APPS_PATH,
        apps_json(vec![crate::models::marathon::app_json(
            "scheduler-alwaysthere",
            "scheduler-alwaysthere",
            "127.0.0.1",
            16000,
        )]),
    );
    upstream.set_json(
        MARATHON_LEADER_PATH,
        serde_json::json!({"leader": "127.0.0.2:80"}),
    );
    upstream
}

/// Collects formatted log lines of the current thread while the returned
/// guard is alive.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install() -> (Self, DefaultGuard) {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    /// Number of captured lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        String::from_utf8_lossy(&self.buf.lock())
            .lines()
            .filter(|line| line.contains(needle))
            .count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
