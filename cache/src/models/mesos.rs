use super::{Decode, http_url};
use crate::upstream::FetchError;
use serde::Deserialize;

/// Subset of Mesos `/master/state-summary`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MesosState {
    #[serde(default)]
    pub frameworks: Vec<Framework>,
    #[serde(default)]
    pub slaves: Vec<Agent>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Framework {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub webui_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub pid: String,
}

impl MesosState {
    pub fn framework_by_id(&self, id: &str) -> Option<&Framework> {
        self.frameworks.iter().find(|f| f.id == id)
    }

    pub fn framework_by_name(&self, name: &str) -> Option<&Framework> {
        self.frameworks.iter().find(|f| f.name == name)
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.slaves.iter().find(|a| a.id == id)
    }
}

impl Framework {
    /// The web UI URL without a trailing slash, if the framework has one.
    pub fn webui_url(&self) -> Option<String> {
        self.webui_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .map(String::from)
    }
}

impl Agent {
    /// Agent address derived from the libprocess pid, `slave(1)@<host>:<port>`.
    pub fn upstream_url(&self) -> Option<String> {
        let (_, address) = self.pid.split_once('@')?;
        let (host, port) = address.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(http_url(host, port))
    }
}

impl Decode for MesosState {
    fn decode(body: &[u8]) -> Result<Self, FetchError> {
        serde_json::from_slice(body)
            .map_err(|e| FetchError::Decode(format!("Cannot decode Mesos state JSON: {e}")))
    }
}
