//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default lifetime of issued tokens.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum records accepted in one push.
    pub max_push_records: usize,
    /// Whether to require signed bearer tokens.
    pub require_auth: bool,
    /// HMAC secret for token signing (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of issued tokens.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_push_records: 10_000,
            require_auth: false,
            auth_secret: None,
            token_expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }

    /// Sets the maximum records accepted in one push.
    pub fn with_max_push_records(mut self, max: usize) -> Self {
        self.max_push_records = max;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
