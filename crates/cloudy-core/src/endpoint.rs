//! Deployment endpoint client
//!
//! Each deployment target is tracked by a remote endpoint that records the
//! commit it should run. Polling returns the current record; setting the
//! commit updates it. Both calls are idempotent.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors talking to a single deployment endpoint
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Transport-level failure (connection refused, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The endpoint answered with something that is not a deployment record
    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl From<reqwest::Error> for EndpointError {
    fn from(err: reqwest::Error) -> Self {
        EndpointError::Http(err.to_string())
    }
}

/// Deployment record returned by a poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    /// Deployment name
    pub name: String,
    /// Commit currently recorded; `None` before the first deployment
    #[serde(default)]
    pub commit: Option<String>,
    /// Whatever else the endpoint reports
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DeploymentStatus {
    pub fn is_at(&self, commit: &str) -> bool {
        self.commit.as_deref() == Some(commit)
    }
}

/// Remote deployment endpoint operations.
#[async_trait]
pub trait DeploymentEndpoint: Send + Sync {
    /// Fetch the endpoint's current deployment record.
    async fn poll(&self, url: &str) -> Result<DeploymentStatus, EndpointError>;

    /// Record `commit` as the one the deployment must run.
    async fn set_commit(&self, url: &str, commit: &str) -> Result<(), EndpointError>;
}

#[derive(Serialize)]
struct SetCommitRequest<'a> {
    commit: &'a str,
}

/// HTTP client for deployment endpoints.
///
/// `poll` is `GET <url>`; `set_commit` is `POST <url>` with a JSON body
/// `{"commit": "<sha>"}`.
#[derive(Debug, Clone)]
pub struct HttpEndpointClient {
    http_client: reqwest::Client,
}

impl HttpEndpointClient {
    /// Default request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<Self, EndpointError> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, EndpointError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("cloudy/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(HttpEndpointClient { http_client })
    }
}

#[async_trait]
impl DeploymentEndpoint for HttpEndpointClient {
    async fn poll(&self, url: &str) -> Result<DeploymentStatus, EndpointError> {
        debug!(url, "polling deployment endpoint");
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EndpointError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| EndpointError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn set_commit(&self, url: &str, commit: &str) -> Result<(), EndpointError> {
        debug!(url, commit, "updating deployment endpoint");
        let response = self
            .http_client
            .post(url)
            .json(&SetCommitRequest { commit })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EndpointError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn poll_parses_deployment_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deployments/web/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "web",
                "commit": "abc123",
                "project": "shop",
            })))
            .mount(&server)
            .await;

        let client = HttpEndpointClient::new().unwrap();
        let status = client
            .poll(&format!("{}/deployments/web/", server.uri()))
            .await
            .unwrap();

        assert_eq!(status.name, "web");
        assert!(status.is_at("abc123"));
        assert_eq!(status.extra["project"], Value::String("shop".into()));
    }

    #[tokio::test]
    async fn poll_accepts_missing_commit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "new"})),
            )
            .mount(&server)
            .await;

        let client = HttpEndpointClient::new().unwrap();
        let status = client.poll(&server.uri()).await.unwrap();
        assert_eq!(status.commit, None);
        assert!(!status.is_at("abc"));
    }

    #[tokio::test]
    async fn poll_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpEndpointClient::new().unwrap();
        let err = client.poll(&server.uri()).await.unwrap_err();
        assert!(matches!(err, EndpointError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn poll_rejects_non_record_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = HttpEndpointClient::new().unwrap();
        let err = client.poll(&server.uri()).await.unwrap_err();
        assert!(matches!(err, EndpointError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn set_commit_posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deployments/web/"))
            .and(body_json(serde_json::json!({"commit": "def456"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpEndpointClient::new().unwrap();
        client
            .set_commit(&format!("{}/deployments/web/", server.uri()), "def456")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let client = HttpEndpointClient::with_timeout(Duration::from_secs(2)).unwrap();
        let err = client.poll("http://127.0.0.1:9/").await.unwrap_err();
        assert!(matches!(err, EndpointError::Http(_)));
    }
}
