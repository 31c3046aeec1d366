use super::{Decode, http_url};
use crate::upstream::FetchError;
use serde::Deserialize;

/// One record of a MesosDNS `/v1/services/<srv>` reply. MesosDNS answers an
/// unknown service with a single record whose fields are all empty strings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SrvRecord {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: SrvPort,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SrvPort {
    Number(u64),
    Text(String),
    #[default]
    Missing,
}

impl SrvPort {
    pub fn value(&self) -> Option<u16> {
        match self {
            SrvPort::Number(n) => u16::try_from(*n).ok(),
            SrvPort::Text(s) => s.trim().parse().ok(),
            SrvPort::Missing => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SrvRecords(pub Vec<SrvRecord>);

impl SrvRecords {
    /// URL of the first record that has both an address and a port.
    pub fn first_upstream(&self) -> Option<String> {
        self.0.iter().find_map(|record| {
            let port = record.port.value()?;
            if record.ip.is_empty() || port == 0 {
                return None;
            }
            Some(http_url(&record.ip, port))
        })
    }
}

impl Decode for SrvRecords {
    fn decode(body: &[u8]) -> Result<Self, FetchError> {
        serde_json::from_slice(body)
            .map(SrvRecords)
            .map_err(|e| FetchError::Decode(format!("Cannot decode MesosDNS JSON: {e}")))
    }
}

/// SRV name MesosDNS uses for a Marathon app, e.g. `nest2/nest1/app` becomes
/// `_app.nest1.nest2._tcp.marathon.mesos`.
pub fn srv_name(service_name: &str) -> String {
    let labels: Vec<&str> = service_name
        .split('/')
        .filter(|s| !s.is_empty())
        .rev()
        .collect();
    format!("_{}._tcp.marathon.mesos", labels.join("."))
}
