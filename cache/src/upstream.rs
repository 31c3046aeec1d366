use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use url::Url;

/// Sent on every request to Mesos, Marathon and MesosDNS.
pub const USER_AGENT: &str = "Master Admin Router";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("invalid response status: {0}")]
    Status(u16),
    #[error("connection timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{0}")]
    Decode(String),
}

/// Performs a single GET against an upstream. The cache never retries on
/// its own, a failed fetch is reported as is.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Bytes, FetchError>;
}

#[derive(Clone)]
pub struct HttpUpstreamClient {
    client: reqwest::Client,
}

impl HttpUpstreamClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(HttpUpstreamClient { client })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<Bytes, FetchError> {
        tracing::debug!(%url, "Fetching upstream");

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response.bytes().await.map_err(classify)
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    async fn server_with(status: u16, delay: Duration) -> MockServer {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/state-summary")
                    .header("user-agent", USER_AGENT);
                then.status(status).body("{}").delay(delay);
            })
            .await;
        server
    }

    fn url(server: &MockServer) -> Url {
        Url::parse(&server.url("/state-summary")).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let server = server_with(200, Duration::ZERO).await;
        let client = HttpUpstreamClient::new().unwrap();

        let body = client
            .fetch(&url(&server), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(body, Bytes::from("{}"));
    }

    #[tokio::test]
    async fn test_fetch_bad_status() {
        let server = server_with(500, Duration::ZERO).await;
        let client = HttpUpstreamClient::new().unwrap();

        let err = client
            .fetch(&url(&server), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Status(500));
        assert_eq!(err.to_string(), "invalid response status: 500");
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = server_with(200, Duration::from_secs(2)).await;
        let client = HttpUpstreamClient::new().unwrap();

        let err = client
            .fetch(&url(&server), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout);
        assert_eq!(err.to_string(), "connection timed out");
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let client = HttpUpstreamClient::new().unwrap();
        // Port 1 is never listening in the test environment.
        let url = Url::parse("http://127.0.0.1:1/state-summary").unwrap();

        let err = client
            .fetch(&url, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Connection(_)));
    }
}
