//! Sync coordinator state machine.

use crate::applier::{AppliedCounts, PullApplied, StoreApplier};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::timing::is_due;
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidesync_core::{RecordStore, Timestamp};
use tidesync_sync_protocol::{ChangeSet, PullRequest, PushRequest};
use tracing::{debug, info, warn};

/// The current state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync has run yet.
    Idle,
    /// Waiting for the pull response.
    Pulling,
    /// Writing the pulled changes.
    Applying,
    /// Waiting for the push response.
    Pushing,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
    /// Waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if a cycle is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pulling | SyncState::Applying | SyncState::Pushing | SyncState::RetryWait
        )
    }
}

/// Running totals across cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that completed.
    pub cycles_completed: u64,
    /// Cycles that failed.
    pub cycles_failed: u64,
    /// Records applied from pulls.
    pub records_pulled: u64,
    /// Records pushed.
    pub records_pushed: u64,
    /// Retries performed by [`SyncCoordinator::sync_with_retry`].
    pub retries: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a successful sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCycleResult {
    /// Records applied from the pull.
    pub applied: AppliedCounts,
    /// Records pushed.
    pub pushed: usize,
    /// Watermark after the cycle.
    pub watermark: Timestamp,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Result of a pull without push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    /// Records applied.
    pub applied: AppliedCounts,
    /// Watermark after the pull.
    pub watermark: Timestamp,
    /// Duration of the pull.
    pub duration: Duration,
}

/// Snapshot of the coordinator for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Current state.
    pub state: SyncState,
    /// Sync watermark.
    pub watermark: Option<Timestamp>,
    /// Last fully successful sync.
    pub last_synced_at: Option<Timestamp>,
    /// Records waiting to be pushed.
    pub pending_changes: usize,
    /// Message of the last failure, cleared by a success.
    pub last_error: Option<String>,
}

/// Coordinates pull-then-push sync cycles for one [`RecordStore`].
///
/// # Invariants
///
/// - At most one cycle runs at a time; an overlapping call fails with
///   [`SyncError::AlreadySyncing`]
/// - Pull and apply strictly precede push
/// - The watermark only moves in the same commit as an applied pull
/// - A pull-side failure leaves store and watermark untouched
pub struct SyncCoordinator<T: SyncTransport> {
    config: SyncConfig,
    transport: T,
    applier: StoreApplier,
    gate: tokio::sync::Mutex<()>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    /// Creates a coordinator.
    pub fn new(store: Arc<RecordStore>, transport: T, config: SyncConfig) -> Self {
        Self {
            config,
            transport,
            applier: StoreApplier::new(store),
            gate: tokio::sync::Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<RecordStore> {
        self.applier.store()
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the running totals.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the sync watermark.
    pub fn watermark(&self) -> Option<Timestamp> {
        self.applier.watermark()
    }

    /// Returns the time of the last fully successful sync.
    pub fn last_synced_at(&self) -> Option<Timestamp> {
        self.applier.last_synced_at()
    }

    /// Returns a status snapshot.
    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            state: self.state(),
            watermark: self.watermark(),
            last_synced_at: self.last_synced_at(),
            pending_changes: self.store().pending_count(),
            last_error: self.stats.read().last_error.clone(),
        }
    }

    /// Asks the running cycle to stop.
    ///
    /// The current network call completes first; the cycle then fails with
    /// [`SyncError::Cancelled`] at the next phase boundary. An apply that
    /// already committed stays committed, and a push the server accepted
    /// stays acknowledged, but the sync is not recorded as successful.
    /// A retry loop waiting out its backoff stops without another attempt.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears the watermark and sync metadata so the next sync is a full
    /// download. Local records and pending changes are kept.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadySyncing`] while a cycle runs.
    pub fn reset(&self) -> SyncResult<()> {
        let _guard = self.gate.try_lock().map_err(|_| SyncError::AlreadySyncing)?;
        self.applier.reset()?;
        self.set_state(SyncState::Idle);
        info!("sync metadata reset, next sync downloads everything");
        Ok(())
    }

    /// Performs a full sync cycle: pull, apply, then push.
    ///
    /// # Errors
    ///
    /// Any pull-side failure leaves store and watermark unchanged. A failure
    /// after the pull committed is reported as [`SyncError::PushFailed`];
    /// in that case the watermark has advanced and local changes remain
    /// queued for the next cycle.
    pub async fn sync(&self, endpoint: &str, credential: &str) -> SyncResult<SyncCycleResult> {
        let _guard = self.begin(endpoint, credential)?;
        self.attempt(endpoint, credential).await
    }

    async fn attempt(&self, endpoint: &str, credential: &str) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let outcome = self.run_cycle(endpoint, credential, start).await;
        match &outcome {
            Ok(result) => {
                info!(
                    created = result.applied.created,
                    updated = result.applied.updated,
                    deleted = result.applied.deleted,
                    pushed = result.pushed,
                    watermark = %result.watermark,
                    duration_ms = result.duration.as_millis() as u64,
                    "sync completed"
                );
                self.finish_success(result.applied, result.pushed);
            }
            Err(e) => self.handle_error(e),
        }
        outcome
    }

    /// Pulls and applies remote changes without pushing.
    ///
    /// # Errors
    ///
    /// Same as the pull side of [`SyncCoordinator::sync`].
    pub async fn pull_only(&self, endpoint: &str, credential: &str) -> SyncResult<PullResult> {
        let _guard = self.begin(endpoint, credential)?;
        let start = Instant::now();

        let outcome = self.pull_and_apply(endpoint, credential).await;
        match outcome {
            Ok(pulled) => {
                let result = PullResult {
                    applied: pulled.counts,
                    watermark: pulled.watermark,
                    duration: start.elapsed(),
                };
                info!(
                    records = result.applied.total(),
                    watermark = %result.watermark,
                    "pull completed"
                );
                self.finish_success(result.applied, 0);
                Ok(result)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Runs [`SyncCoordinator::sync`], retrying retryable failures with
    /// exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the last error once the
    /// attempts are used up. A [`SyncCoordinator::cancel`] during the
    /// backoff wait ends the loop with [`SyncError::Cancelled`].
    pub async fn sync_with_retry(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> SyncResult<SyncCycleResult> {
        let _guard = self.begin(endpoint, credential)?;
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying sync");
                self.set_state(SyncState::RetryWait);
                tokio::time::sleep(delay).await;
                if let Err(e) = self.check_cancelled() {
                    self.handle_error(&e);
                    return Err(e);
                }
                self.stats.write().retries += 1;
            }

            match self.attempt(endpoint, credential).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    warn!(error = %e, attempt, "sync attempt failed");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs [`SyncCoordinator::sync`] if the timing policy says a sync is
    /// due; otherwise returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Same as [`SyncCoordinator::sync`].
    pub async fn sync_if_due(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> SyncResult<Option<SyncCycleResult>> {
        if !is_due(self.last_synced_at(), self.config.sync_interval) {
            debug!("sync not due");
            return Ok(None);
        }
        self.sync(endpoint, credential).await.map(Some)
    }

    fn begin(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> SyncResult<tokio::sync::MutexGuard<'_, ()>> {
        let guard = self.gate.try_lock().map_err(|_| {
            warn!("sync requested while another sync is running");
            SyncError::AlreadySyncing
        })?;

        if endpoint.trim().is_empty() {
            return Err(SyncError::InvalidConfiguration("empty endpoint".into()));
        }
        if credential.trim().is_empty() {
            return Err(SyncError::AuthenticationFailed("missing credential".into()));
        }

        self.cancelled.store(false, Ordering::SeqCst);
        Ok(guard)
    }

    async fn run_cycle(
        &self,
        endpoint: &str,
        credential: &str,
        start: Instant,
    ) -> SyncResult<SyncCycleResult> {
        let pulled = self.pull_and_apply(endpoint, credential).await?;
        self.check_cancelled()?;

        let pushed = self
            .push_pending(endpoint, credential, pulled.watermark)
            .await
            .map_err(|source| SyncError::PushFailed {
                applied: pulled.counts,
                source: Box::new(source),
            })?;
        self.check_cancelled()?;

        self.applier.record_success(Timestamp::now())?;

        Ok(SyncCycleResult {
            applied: pulled.counts,
            pushed,
            watermark: pulled.watermark,
            duration: start.elapsed(),
        })
    }

    async fn pull_and_apply(&self, endpoint: &str, credential: &str) -> SyncResult<PullApplied> {
        self.set_state(SyncState::Pulling);
        let request = PullRequest {
            last_pulled_at: self.applier.watermark().map(Timestamp::as_millis),
            schema_version: self.store().schema().version(),
            migration: self.applier.migration()?,
        };
        debug!(last_pulled_at = ?request.last_pulled_at, "pulling");

        let response = self
            .with_timeout(self.transport.pull(endpoint, credential, &request))
            .await?;
        self.check_cancelled()?;

        self.set_state(SyncState::Applying);
        self.applier.apply_pull(&response)
    }

    async fn push_pending(
        &self,
        endpoint: &str,
        credential: &str,
        watermark: Timestamp,
    ) -> SyncResult<usize> {
        let pending = self.applier.pending();
        if pending.is_empty() {
            debug!("nothing to push");
            return Ok(0);
        }

        self.set_state(SyncState::Pushing);
        let request = PushRequest {
            changes: ChangeSet::from_local(&pending),
            last_pulled_at: watermark.as_millis(),
        };
        debug!(records = pending.record_count(), "pushing");

        self.with_timeout(self.transport.push(endpoint, credential, &request))
            .await?;

        let marked = self.applier.acknowledge(&pending)?;
        if marked < pending.record_count() {
            debug!(
                still_pending = pending.record_count() - marked,
                "records edited during push stay queued"
            );
        }
        Ok(pending.record_count())
    }

    async fn with_timeout<F, R>(&self, call: F) -> SyncResult<R>
    where
        F: Future<Output = SyncResult<R>>,
    {
        tokio::time::timeout(self.config.timeout, call)
            .await
            .map_err(|_| SyncError::Timeout)?
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn finish_success(&self, applied: AppliedCounts, pushed: usize) {
        self.set_state(SyncState::Synced);
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.records_pulled += applied.total() as u64;
        stats.records_pushed += pushed as u64;
        stats.last_error = None;
    }

    fn handle_error(&self, error: &SyncError) {
        warn!(error = %error, "sync failed");
        self.set_state(SyncState::Error);
        let mut stats = self.stats.write();
        stats.cycles_failed += 1;
        stats.last_error = Some(error.to_string());
    }
}
