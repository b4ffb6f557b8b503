//! HTTP and loopback transports.
//!
//! [`HttpTransport`] talks to a sync server over HTTP with `reqwest`.
//! [`LoopbackTransport`] hands the same JSON bodies to an in-process
//! server, so the full encode/status/decode path runs without a socket.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tidesync_sync_protocol::{
    decode, encode, PullRequest, PullResponse, PushRequest, PULL_PATH, PUSH_PATH,
};
use tracing::debug;

/// Joins an endpoint and a path without doubling the slash.
pub fn join_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

/// HTTP-based sync transport.
///
/// Sends JSON bodies with an `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfiguration`] if the TLS backend cannot
    /// be initialized.
    pub fn new() -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tidesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::InvalidConfiguration(e.to_string()))?;
        Ok(Self { client })
    }

    /// Creates a transport around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(
        &self,
        endpoint: &str,
        path: &str,
        credential: &str,
        body: Vec<u8>,
    ) -> SyncResult<Vec<u8>> {
        let url = join_url(endpoint, path);
        debug!(%url, bytes = body.len(), "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            return Err(SyncError::from_status(status.as_u16(), &bytes));
        }
        Ok(bytes.to_vec())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_builder() {
        SyncError::InvalidConfiguration(err.to_string())
    } else {
        SyncError::transport_retryable(err.to_string())
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn pull(
        &self,
        endpoint: &str,
        credential: &str,
        request: &PullRequest,
    ) -> SyncResult<PullResponse> {
        let body = self
            .post(endpoint, PULL_PATH, credential, encode(request)?)
            .await?;
        Ok(decode(&body)?)
    }

    async fn push(
        &self,
        endpoint: &str,
        credential: &str,
        request: &PushRequest,
    ) -> SyncResult<()> {
        self.post(endpoint, PUSH_PATH, credential, encode(request)?)
            .await?;
        Ok(())
    }
}

/// An in-process server reachable through [`LoopbackTransport`].
pub trait LoopbackServer: Send + Sync {
    /// Handles a request body for `path` and returns `(status, body)`.
    fn handle(&self, path: &str, credential: &str, body: &[u8]) -> (u16, Vec<u8>);
}

/// Transport that calls a [`LoopbackServer`] directly.
pub struct LoopbackTransport<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackTransport<S> {
    /// Creates a loopback transport.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }

    fn call(&self, path: &str, credential: &str, body: &[u8]) -> SyncResult<Vec<u8>> {
        let (status, reply) = self.server.handle(path, credential, body);
        if (200..300).contains(&status) {
            Ok(reply)
        } else {
            Err(SyncError::from_status(status, &reply))
        }
    }
}

#[async_trait]
impl<S: LoopbackServer> SyncTransport for LoopbackTransport<S> {
    async fn pull(
        &self,
        _endpoint: &str,
        credential: &str,
        request: &PullRequest,
    ) -> SyncResult<PullResponse> {
        let reply = self.call(PULL_PATH, credential, &encode(request)?)?;
        Ok(decode(&reply)?)
    }

    async fn push(
        &self,
        _endpoint: &str,
        credential: &str,
        request: &PushRequest,
    ) -> SyncResult<()> {
        self.call(PUSH_PATH, credential, &encode(request)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_sync_protocol::ChangeSet;

    struct Fixed(u16, &'static str);

    impl LoopbackServer for Fixed {
        fn handle(&self, _path: &str, _credential: &str, _body: &[u8]) -> (u16, Vec<u8>) {
            (self.0, self.1.as_bytes().to_vec())
        }
    }

    fn pull_request() -> PullRequest {
        PullRequest {
            last_pulled_at: None,
            schema_version: 1,
            migration: None,
        }
    }

    #[test]
    fn join_url_handles_trailing_slash() {
        assert_eq!(join_url("http://h/api/", PULL_PATH), "http://h/api/sync/pull");
        assert_eq!(join_url("http://h", PUSH_PATH), "http://h/sync/push");
    }

    #[tokio::test]
    async fn loopback_decodes_success() {
        let transport = LoopbackTransport::new(Fixed(200, r#"{"changes":{},"timestamp":9}"#));
        let response = transport.pull("", "t", &pull_request()).await.unwrap();
        assert_eq!(response.timestamp, 9);
    }

    #[tokio::test]
    async fn loopback_maps_statuses() {
        let transport = LoopbackTransport::new(Fixed(401, r#"{"error":"bad token"}"#));
        assert!(matches!(
            transport.pull("", "t", &pull_request()).await,
            Err(SyncError::AuthenticationFailed(_))
        ));

        let transport = LoopbackTransport::new(Fixed(503, "busy"));
        let push = PushRequest {
            changes: ChangeSet::new(),
            last_pulled_at: 1,
        };
        let err = transport.push("", "t", &push).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn loopback_rejects_garbage_body() {
        let transport = LoopbackTransport::new(Fixed(200, "not json"));
        assert!(matches!(
            transport.pull("", "t", &pull_request()).await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() {
        let transport = HttpTransport::new().unwrap();
        // Port 9 (discard) on localhost is closed on test machines.
        let err = transport
            .pull("http://127.0.0.1:9", "t", &pull_request())
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
