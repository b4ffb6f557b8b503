//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tidesync_sync_protocol::{PullRequest, PullResponse, PushRequest};

/// A sync transport handles network communication with the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
/// Implementations map failures onto the [`SyncError`] taxonomy; the
/// coordinator adds the per-call timeout itself.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Pulls changes since `request.last_pulled_at`.
    async fn pull(
        &self,
        endpoint: &str,
        credential: &str,
        request: &PullRequest,
    ) -> SyncResult<PullResponse>;

    /// Pushes local changes. Any 2xx response is success.
    async fn push(&self, endpoint: &str, credential: &str, request: &PushRequest)
        -> SyncResult<()>;
}

/// A scripted transport for testing.
///
/// Replies are consumed in the order they were queued. A pull with no
/// queued reply fails with a protocol error; a push with no queued reply
/// succeeds. Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    pull_replies: Mutex<VecDeque<SyncResult<PullResponse>>>,
    push_replies: Mutex<VecDeque<SyncResult<()>>>,
    pulls: Mutex<Vec<PullRequest>>,
    pushes: Mutex<Vec<PushRequest>>,
    delay: Mutex<Duration>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reply, to exercise timeouts and overlapping syncs.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    /// Queues a successful pull reply.
    pub fn queue_pull(&self, response: PullResponse) {
        self.pull_replies.lock().push_back(Ok(response));
    }

    /// Queues a failing pull reply.
    pub fn queue_pull_error(&self, error: SyncError) {
        self.pull_replies.lock().push_back(Err(error));
    }

    /// Queues a failing push reply.
    pub fn queue_push_error(&self, error: SyncError) {
        self.push_replies.lock().push_back(Err(error));
    }

    /// Returns every pull request received so far.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pulls.lock().clone()
    }

    /// Returns every push request received so far.
    pub fn push_requests(&self) -> Vec<PushRequest> {
        self.pushes.lock().clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn pull(
        &self,
        _endpoint: &str,
        _credential: &str,
        request: &PullRequest,
    ) -> SyncResult<PullResponse> {
        self.pulls.lock().push(request.clone());
        self.pause().await;
        self.pull_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no mock pull response queued".into())))
    }

    async fn push(
        &self,
        _endpoint: &str,
        _credential: &str,
        request: &PushRequest,
    ) -> SyncResult<()> {
        self.pushes.lock().push(request.clone());
        self.pause().await;
        self.push_replies.lock().pop_front().unwrap_or(Ok(()))
    }
}
