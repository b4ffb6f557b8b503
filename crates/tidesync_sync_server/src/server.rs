//! Main sync server.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::ServerStore;
use std::sync::Arc;
use tidesync_sync_protocol::{
    decode, encode, PullRequest, PullResponse, PushRequest, PULL_PATH, PUSH_PATH,
};
use tracing::{debug, info, warn};

/// The sync server.
///
/// Authenticates callers, answers pulls from the [`ServerStore`], and
/// applies pushes to it. HTTP framing lives in [`crate::router`];
/// [`SyncServer::handle_raw`] exposes the same logic on raw JSON bodies.
///
/// # Example
///
/// ```
/// use tidesync_sync_server::{ServerConfig, SyncServer};
///
/// let config = ServerConfig::default().with_auth(b"server-secret".to_vec());
/// let server = SyncServer::new(config);
/// let token = server.issue_token("alice").unwrap().unwrap();
/// assert_eq!(server.authenticate(&token).unwrap(), "alice");
/// ```
pub struct SyncServer {
    config: ServerConfig,
    validator: Option<TokenValidator>,
    store: Arc<ServerStore>,
}

impl SyncServer {
    /// Creates a new sync server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(ServerStore::new()))
    }

    /// Creates a sync server with an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<ServerStore>) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => None,
        };
        Self {
            config,
            validator,
            store,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<ServerStore> {
        &self.store
    }

    /// Issues a token for `user_id`. Returns `None` when auth is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] for an unusable user ID.
    pub fn issue_token(&self, user_id: &str) -> ServerResult<Option<String>> {
        self.validator
            .as_ref()
            .map(|v| v.create_token(user_id))
            .transpose()
    }

    /// Checks a bearer credential and returns the caller's identity.
    ///
    /// With auth disabled any non-empty credential is accepted and used as
    /// the identity.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AuthenticationFailed`] otherwise.
    pub fn authenticate(&self, credential: &str) -> ServerResult<String> {
        if credential.trim().is_empty() {
            return Err(ServerError::AuthenticationFailed("missing credential".into()));
        }
        match &self.validator {
            Some(validator) => validator.validate(credential),
            None => Ok(credential.to_string()),
        }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, credential: &str, request: &PullRequest) -> ServerResult<PullResponse> {
        let user = self.authenticate(credential)?;
        let response = self.store.pull(request);
        debug!(
            %user,
            last_pulled_at = ?request.last_pulled_at,
            records = response.changes.len(),
            timestamp = response.timestamp,
            "pull served"
        );
        Ok(response)
    }

    /// Handles a push request.
    pub fn handle_push(&self, credential: &str, request: &PushRequest) -> ServerResult<()> {
        let user = self.authenticate(credential)?;
        let count = request.changes.len();
        if count > self.config.max_push_records {
            return Err(ServerError::InvalidRequest(format!(
                "too many records: {count} > {}",
                self.config.max_push_records
            )));
        }

        match self.store.push(request) {
            Ok(outcome) => {
                info!(%user, applied = outcome.applied, timestamp = outcome.timestamp, "push accepted");
                Ok(())
            }
            Err(e) => {
                warn!(%user, error = %e, "push rejected");
                Err(e)
            }
        }
    }

    /// Handles a raw JSON request for `path` and returns `(status, body)`.
    ///
    /// Errors are returned as an `{"error": ...}` body with the matching
    /// status.
    pub fn handle_raw(&self, path: &str, credential: &str, body: &[u8]) -> (u16, Vec<u8>) {
        match self.dispatch(path, credential, body) {
            Ok(reply) => (200, reply),
            Err(e) => {
                let reply = encode(&e.body()).unwrap_or_default();
                (e.status().as_u16(), reply)
            }
        }
    }

    fn dispatch(&self, path: &str, credential: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        match path {
            PULL_PATH => {
                let request: PullRequest = decode(body)?;
                Ok(encode(&self.handle_pull(credential, &request)?)?)
            }
            PUSH_PATH => {
                let request: PushRequest = decode(body)?;
                self.handle_push(credential, &request)?;
                Ok(b"{}".to_vec())
            }
            other => Err(ServerError::NotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn server() -> SyncServer {
        SyncServer::new(ServerConfig::default())
    }

    #[test]
    fn open_server_accepts_any_credential() {
        let server = server();
        assert_eq!(server.authenticate("dev").unwrap(), "dev");
        assert!(server.authenticate(" ").is_err());
        assert_eq!(server.issue_token("alice").unwrap(), None);
    }

    #[test]
    fn secured_server_requires_signed_token() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"secret".to_vec()));
        assert!(server.authenticate("dev").is_err());
        let token = server.issue_token("alice").unwrap().unwrap();
        assert_eq!(server.authenticate(&token).unwrap(), "alice");
    }

    #[test]
    fn full_sync_flow() {
        let server = server();

        let (status, body) = server.handle_raw(PULL_PATH, "dev", br#"{"lastPulledAt":null,"schemaVersion":1}"#);
        assert_eq!(status, 200);
        let first: Value = serde_json::from_slice(&body).unwrap();
        let since = first["timestamp"].as_i64().unwrap();

        let push = json!({
            "changes": {"posts": {"created": [{"id": "p1", "title": "hi"}]}},
            "lastPulledAt": since
        });
        let (status, _) = server.handle_raw(PUSH_PATH, "dev", push.to_string().as_bytes());
        assert_eq!(status, 200);

        let pull = json!({"lastPulledAt": since, "schemaVersion": 1});
        let (_, body) = server.handle_raw(PULL_PATH, "dev", pull.to_string().as_bytes());
        let second: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(second["changes"]["posts"]["created"][0]["id"], "p1");
    }

    #[test]
    fn raw_errors_carry_status_and_body() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"secret".to_vec()));
        let pull = br#"{"lastPulledAt":null,"schemaVersion":1}"#;
        let (status, body) = server.handle_raw(PULL_PATH, "forged", pull);
        assert_eq!(status, 401);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("authentication"));

        let open = SyncServer::new(ServerConfig::default());
        assert_eq!(open.handle_raw(PULL_PATH, "dev", b"nope").0, 400);
        assert_eq!(open.handle_raw("/sync/other", "dev", b"{}").0, 404);
    }

    #[test]
    fn oversized_push_rejected() {
        let server = SyncServer::new(ServerConfig::default().with_max_push_records(1));
        let push = json!({
            "changes": {"posts": {"created": [{"id": "a"}, {"id": "b"}]}},
            "lastPulledAt": 0
        });
        assert_eq!(server.handle_raw(PUSH_PATH, "dev", push.to_string().as_bytes()).0, 400);
        assert!(server.store().is_empty());
    }
}
