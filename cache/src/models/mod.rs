//! Typed payloads of the upstream responses held in the cache.

pub mod marathon;
pub mod mesos;
pub mod mesos_dns;

use crate::upstream::FetchError;

/// Turns a raw upstream body into the value stored in a cache entry.
pub trait Decode: Sized + Send + Sync + 'static {
    fn decode(body: &[u8]) -> Result<Self, FetchError>;
}

/// `http://<host>:<port>`
pub(crate) fn http_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}
