//! # tidesync Sync Server
//!
//! Reference HTTP sync server for tidesync.
//!
//! This crate provides:
//! - HTTP endpoints (pull, push) on axum
//! - An authoritative in-memory record store with tombstones
//! - Authentication (HMAC-SHA256 bearer tokens)
//! - Conflict detection against the client's watermark
//!
//! # Architecture
//!
//! The server keeps every record by `(collection, id)` together with the
//! server time it was created and last changed. Its clock is strictly
//! increasing, so the timestamp returned by a pull is a safe watermark.
//!
//! # Authentication
//!
//! Authentication is optional but recommended outside development:
//!
//! ```rust
//! use tidesync_sync_server::{AuthConfig, TokenValidator};
//!
//! let validator = TokenValidator::new(AuthConfig::new(b"server-secret".to_vec()));
//! let token = validator.create_token("alice").unwrap();
//! assert_eq!(validator.validate(&token).unwrap(), "alice");
//! ```
//!
//! # Protocol
//!
//! 1. Client pulls changes since its watermark
//! 2. Client applies them and stores the returned timestamp
//! 3. Client pushes local changes with that timestamp
//! 4. Server rejects the push with 409 if a pushed record changed after it

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod auth;
mod config;
mod error;
mod routes;
mod server;
mod store;

pub use auth::{bearer_token, AuthConfig, TokenValidator};
pub use config::{ServerConfig, DEFAULT_TOKEN_EXPIRY};
pub use error::{ServerError, ServerResult};
pub use routes::{router, serve, serve_on};
pub use server::SyncServer;
pub use store::{PushOutcome, ServerStore};
