use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] crate::config::ValidationError),
    #[error("invalid upstream URL {0}")]
    InvalidUpstream(String),
    #[error("invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    #[error("{0} upstreams are not supported")]
    UnsupportedScheme(String),
    #[error("upstream request failed: {0}")]
    Forward(#[from] hyper_util::client::legacy::Error),
    #[error("could not build upstream client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("cache error: {0}")]
    Cache(#[from] cache::ManagerError),
}
