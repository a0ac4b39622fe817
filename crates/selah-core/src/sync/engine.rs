//! Drains the sync queue against the remote store
//!
//! One drain runs at a time. A trigger that arrives mid-drain schedules a
//! single follow-up drain; any further triggers before it starts are absorbed.
//! Within a drain, operations for distinct entities run concurrently up to
//! `max_in_flight`, while each entity only ever has one operation in flight.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::clock::Clock;
use super::connectivity::{ConnectivityMonitor, ConnectivitySignal, Transition};
use super::remote::{RemoteError, RemoteRecord, RemoteStore};
use super::timer::RetryTimer;
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::models::{EntityId, EntityType, FailureKind, SyncOperation};
use crate::services::LocalStore;
use crate::state::SyncState;

/// Whether a drain is running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainPhase {
    #[default]
    Idle,
    Draining,
}

/// Outcome of a drain trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainRequest {
    /// A new drain was started
    Started,
    /// A drain is running; one more will run after it
    FollowUpScheduled,
    /// A follow-up was already scheduled
    Coalesced,
    /// Offline or shut down; nothing was scheduled
    Suppressed,
}

/// An operation that ended a drain parked as failed-permanent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub operation_id: i64,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub kind: FailureKind,
    pub message: String,
}

/// Summary of one drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Operations the remote accepted
    pub confirmed: usize,
    /// Retryable failures put back behind a backoff gate
    pub retried: usize,
    /// Operations parked during this drain
    pub failures: Vec<OperationFailure>,
    /// Parked operations still waiting on the user after the drain
    pub parked: usize,
    /// Operations still queued after the drain
    pub remaining: usize,
    /// The drain stopped because the remote became unreachable
    pub stopped_offline: bool,
    /// Storage failure that aborted the drain
    pub aborted: Option<String>,
}

impl DrainReport {
    /// Whether anything needs a user decision
    pub fn needs_attention(&self) -> bool {
        !self.failures.is_empty() || self.parked > 0 || self.aborted.is_some()
    }
}

/// Drain bookkeeping shared between triggers and the running drain
#[derive(Debug, Clone, Default)]
pub struct DrainState {
    pub phase: DrainPhase,
    pub follow_up: bool,
    pub drains_completed: u64,
    pub last_report: Option<DrainReport>,
    pub shut_down: bool,
    reconnect_pending: bool,
}

struct EngineInner<R> {
    store: LocalStore,
    remote: Arc<R>,
    monitor: Arc<ConnectivityMonitor>,
    settings: SyncSettings,
    clock: Arc<dyn Clock>,
    state: watch::Sender<DrainState>,
    sync_state: watch::Sender<SyncState>,
    timer: RetryTimer,
}

/// Replays queued operations against a [`RemoteStore`]
pub struct SyncEngine<R: RemoteStore> {
    inner: Arc<EngineInner<R>>,
}

impl<R: RemoteStore> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Create an engine and subscribe it to reconnect events
    pub fn new(
        store: LocalStore,
        remote: Arc<R>,
        monitor: Arc<ConnectivityMonitor>,
        settings: SyncSettings,
    ) -> Self {
        let clock = store.clock();
        let initial = if monitor.is_online() {
            SyncState::Synced
        } else {
            SyncState::Offline
        };
        let inner = Arc::new(EngineInner {
            store,
            remote,
            monitor: Arc::clone(&monitor),
            settings,
            clock,
            state: watch::Sender::new(DrainState::default()),
            sync_state: watch::Sender::new(initial),
            timer: RetryTimer::new(),
        });

        let weak = Arc::downgrade(&inner);
        monitor.on_reconnect(move |signal| {
            if let Some(engine) = Self::upgrade(&weak) {
                engine.handle_reconnect(signal);
            }
        });

        Self { inner }
    }

    fn upgrade(weak: &Weak<EngineInner<R>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.inner.monitor
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Snapshot of the drain bookkeeping
    pub fn drain_state(&self) -> DrainState {
        self.inner.state.borrow().clone()
    }

    pub fn drains_completed(&self) -> u64 {
        self.inner.state.borrow().drains_completed
    }

    pub fn last_report(&self) -> Option<DrainReport> {
        self.inner.state.borrow().last_report.clone()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.state.borrow().phase == DrainPhase::Draining
    }

    /// Whether a backoff wake-up or connectivity probe is pending
    pub fn retry_armed(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Current state for status badges
    pub fn sync_state(&self) -> SyncState {
        *self.inner.sync_state.borrow()
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.sync_state.subscribe()
    }

    /// Recompute the published state from drain phase and connectivity
    pub fn refresh_state(&self) {
        let next = {
            let state = self.inner.state.borrow();
            if !self.inner.monitor.is_online() {
                SyncState::Offline
            } else if state.phase == DrainPhase::Draining {
                SyncState::Syncing
            } else if state
                .last_report
                .as_ref()
                .is_some_and(DrainReport::needs_attention)
            {
                SyncState::Error
            } else {
                SyncState::Synced
            }
        };
        self.inner.sync_state.send_if_modified(|current| {
            let changed = *current != next;
            *current = next;
            changed
        });
    }

    /// Ask for a drain; never blocks
    ///
    /// Must be called from within a tokio runtime for the drain to start.
    pub fn request_drain(&self) -> DrainRequest {
        let online = self.inner.monitor.is_online();
        let mut request = DrainRequest::Suppressed;
        self.inner.state.send_if_modified(|state| {
            if state.shut_down || !online {
                return false;
            }
            match state.phase {
                DrainPhase::Draining if state.follow_up => {
                    request = DrainRequest::Coalesced;
                    false
                }
                DrainPhase::Draining => {
                    state.follow_up = true;
                    request = DrainRequest::FollowUpScheduled;
                    true
                }
                DrainPhase::Idle => {
                    state.phase = DrainPhase::Draining;
                    request = DrainRequest::Started;
                    true
                }
            }
        });

        if request == DrainRequest::Started {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                self.refresh_state();
                let engine = self.clone();
                runtime.spawn(engine.run());
            } else {
                tracing::warn!("Sync drain requested outside a tokio runtime; skipping");
                self.inner.state.send_modify(|state| state.phase = DrainPhase::Idle);
                return DrainRequest::Suppressed;
            }
        }

        tracing::debug!("Drain requested: {request:?}");
        request
    }

    /// Wait until no drain is running
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.state.subscribe();
        rx.wait_for(|state| state.phase == DrainPhase::Idle).await.ok();
    }

    /// Drain now and wait for the result, including any coalesced follow-up
    pub async fn sync_now(&self) -> Result<DrainReport> {
        if self.request_drain() == DrainRequest::Suppressed {
            return Err(if self.inner.state.borrow().shut_down {
                Error::ShutDown
            } else {
                Error::Offline
            });
        }
        self.wait_idle().await;
        Ok(self.last_report().unwrap_or_default())
    }

    /// Stop accepting triggers, wait for the active drain, cancel timers
    pub async fn shutdown(&self) {
        self.inner.state.send_modify(|state| {
            state.shut_down = true;
            state.follow_up = false;
        });
        self.inner.monitor.clear_listeners();
        self.wait_idle().await;
        self.inner.timer.cancel();
        tracing::info!("Sync engine stopped");
    }

    fn handle_reconnect(&self, signal: ConnectivitySignal) {
        if signal == ConnectivitySignal::RequestSucceeded && self.is_draining() {
            tracing::debug!("Remote answered during drain; keeping backoff gates");
            self.refresh_state();
            return;
        }
        self.inner.state.send_if_modified(|state| {
            state.reconnect_pending = true;
            false
        });
        self.inner.timer.cancel();
        self.refresh_state();
        self.request_drain();
    }

    async fn run(self) {
        loop {
            let mut reconnect = false;
            self.inner.state.send_if_modified(|state| {
                reconnect = std::mem::take(&mut state.reconnect_pending);
                false
            });

            let report = self.drain_once(reconnect).await;
            self.arm_timer().await;

            let online = self.inner.monitor.is_online();
            let mut again = false;
            self.inner.state.send_modify(|state| {
                state.drains_completed += 1;
                state.last_report = Some(report);
                if state.follow_up && online && !state.shut_down {
                    again = true;
                } else {
                    state.phase = DrainPhase::Idle;
                }
                state.follow_up = false;
            });
            self.refresh_state();

            if !again {
                break;
            }
            tracing::debug!("Running follow-up drain");
        }
    }

    async fn drain_once(&self, reconnect: bool) -> DrainReport {
        let store = &self.inner.store;
        let mut report = DrainReport::default();

        if reconnect {
            match store.prepare_reconnect_drain().await {
                Ok((released, requeued)) if released + requeued > 0 => tracing::info!(
                    "Reconnected: released {released} backoff gate(s), requeued {requeued} exhausted operation(s)"
                ),
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Sync drain aborted: {error}");
                    report.aborted = Some(error.to_string());
                    return report;
                }
            }
        }

        loop {
            if !self.inner.monitor.is_online() {
                report.stopped_offline = true;
                break;
            }

            let batch = match store.due_operations(self.inner.settings.batch_size).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => batch,
                Err(error) => {
                    tracing::warn!("Sync drain aborted: {error}");
                    report.aborted = Some(error.to_string());
                    break;
                }
            };

            if let Err(error) = self.dispatch_batch(batch, &mut report).await {
                tracing::warn!("Sync drain aborted: {error}");
                report.aborted = Some(error.to_string());
                if let Err(error) = store.reset_in_flight().await {
                    tracing::warn!("Failed to clear in-flight flags: {error}");
                }
                break;
            }
        }

        match store.queue_summary().await {
            Ok(summary) => {
                report.parked = summary.parked;
                report.remaining = summary.total;
            }
            Err(error) => tracing::warn!("Failed to read queue summary: {error}"),
        }

        tracing::info!(
            "Sync drain finished: {} confirmed, {} retrying, {} failed, {} queued",
            report.confirmed,
            report.retried,
            report.failures.len(),
            report.remaining
        );
        report
    }

    /// Dispatch one batch with at most `max_in_flight` calls outstanding
    ///
    /// A storage error stops further dispatch but every call already sent is
    /// still awaited and settled; the first such error is returned.
    async fn dispatch_batch(&self, batch: Vec<SyncOperation>, report: &mut DrainReport) -> Result<()> {
        let settings = &self.inner.settings;
        let mut pending = batch.into_iter();
        let mut tasks = JoinSet::new();
        let mut lost = 0_usize;
        let mut failure: Option<Error> = None;

        loop {
            while failure.is_none()
                && tasks.len() < settings.max_in_flight
                && self.inner.monitor.is_online()
            {
                let Some(mut operation) = pending.next() else {
                    break;
                };
                match self.inner.store.begin_attempt(operation.id).await {
                    Ok(attempts) => operation.attempts = attempts,
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
                tracing::debug!(
                    "Dispatching {} {} {} (attempt {})",
                    operation.kind,
                    operation.entity_type,
                    operation.entity_id,
                    operation.attempts
                );

                let remote = Arc::clone(&self.inner.remote);
                let timeout = settings.request_timeout;
                tasks.spawn(async move {
                    let result = tokio::time::timeout(timeout, remote.apply(&operation))
                        .await
                        .unwrap_or(Err(RemoteError::Timeout));
                    (operation, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok((operation, result)) => {
                    let operation_id = operation.id;
                    if let Err(error) = self.settle(operation, result, report).await {
                        tracing::warn!("Failed to record outcome of operation {operation_id}: {error}");
                        failure.get_or_insert(error);
                    }
                }
                Err(error) => {
                    tracing::warn!("Remote call task failed: {error}");
                    lost += 1;
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        if lost > 0 {
            self.inner.store.reset_in_flight().await?;
        }
        Ok(())
    }

    /// Record the outcome of one remote call
    async fn settle(
        &self,
        operation: SyncOperation,
        result: std::result::Result<RemoteRecord, RemoteError>,
        report: &mut DrainReport,
    ) -> Result<()> {
        let store = &self.inner.store;

        match result {
            Ok(record) => {
                self.report_connectivity(ConnectivitySignal::RequestSucceeded);
                let status = store.confirm(&operation).await?;
                tracing::debug!(
                    "Remote accepted {} {} {} as {} ({status:?})",
                    operation.kind,
                    operation.entity_type,
                    operation.entity_id,
                    record.id
                );
                report.confirmed += 1;
            }
            Err(error) if error.is_retryable() || !self.inner.monitor.is_online() => {
                if error.is_retryable() {
                    self.report_connectivity(ConnectivitySignal::RequestFailed);
                }
                let message = error.to_string();

                if operation.attempts >= self.inner.settings.max_attempts {
                    store.park(&operation, FailureKind::Exhausted, &message).await?;
                    Self::record_failure(&operation, FailureKind::Exhausted, message, report);
                } else {
                    let delay = self.inner.settings.backoff_delay(operation.attempts);
                    let next_attempt_at = self
                        .inner
                        .clock
                        .now_millis()
                        .saturating_add(crate::util::duration_millis(delay));
                    store
                        .schedule_retry(operation.id, next_attempt_at, &message)
                        .await?;
                    tracing::debug!(
                        "Retrying {} {} in {delay:?} after: {message}",
                        operation.entity_type,
                        operation.entity_id
                    );
                    report.retried += 1;
                }
            }
            Err(error) => {
                let kind = error.failure_kind().unwrap_or(FailureKind::Rejected);
                let message = error.to_string();
                store.park(&operation, kind, &message).await?;
                Self::record_failure(&operation, kind, message, report);
            }
        }

        Ok(())
    }

    fn record_failure(
        operation: &SyncOperation,
        kind: FailureKind,
        message: String,
        report: &mut DrainReport,
    ) {
        tracing::warn!(
            "Sync of {} {} {} failed ({kind}) after {} attempt(s): {message}",
            operation.kind,
            operation.entity_type,
            operation.entity_id,
            operation.attempts
        );
        report.failures.push(OperationFailure {
            operation_id: operation.id,
            entity_type: operation.entity_type,
            entity_id: operation.entity_id,
            kind,
            message,
        });
    }

    fn report_connectivity(&self, signal: ConnectivitySignal) {
        if self.inner.monitor.report(signal) == Some(Transition::WentOffline) {
            self.refresh_state();
        }
    }

    /// Schedule the next wake-up for backoff gates or a connectivity probe
    async fn arm_timer(&self) {
        if self.inner.state.borrow().shut_down {
            return;
        }

        let next_due = match self.inner.store.next_due_at().await {
            Ok(next_due) => next_due,
            Err(error) => {
                tracing::warn!("Failed to read next retry time: {error}");
                return;
            }
        };
        let Some(due_at) = next_due else {
            self.inner.timer.cancel();
            return;
        };

        let settings = &self.inner.settings;
        let delay = if self.inner.monitor.is_online() {
            let wait = due_at.saturating_sub(self.inner.clock.now_millis());
            u64::try_from(wait)
                .ok()
                .filter(|millis| *millis > 0)
                .map_or(settings.base_delay, Duration::from_millis)
        } else {
            settings.probe_interval
        };

        let probe_interval = settings.probe_interval;
        let weak = Arc::downgrade(&self.inner);
        self.inner.timer.schedule(delay, async move {
            while let Some(engine) = Self::upgrade(&weak) {
                if !engine.on_timer().await {
                    break;
                }
                drop(engine);
                tokio::time::sleep(probe_interval).await;
            }
        });
        tracing::debug!("Next sync wake-up in {delay:?}");
    }

    /// Handle a timer wake-up; returns whether to probe again later
    async fn on_timer(&self) -> bool {
        if self.inner.state.borrow().shut_down {
            return false;
        }
        if self.inner.monitor.is_online() {
            self.request_drain();
            return false;
        }

        let probe = tokio::time::timeout(self.inner.settings.request_timeout, self.inner.remote.ping())
            .await
            .unwrap_or(Err(RemoteError::Timeout));
        match probe {
            Err(error) if error.is_retryable() => {
                tracing::debug!("Connectivity probe failed: {error}");
                true
            }
            // Any answer from the server means it is reachable again
            _ => {
                self.inner.monitor.report(ConnectivitySignal::RequestSucceeded);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, OperationKind, SyncStatus, Syncable, VerseRef};
    use crate::sync::testing::MockRemote;
    use crate::sync::{ManualClock, NetworkStatus};
    use pretty_assertions::assert_eq;

    struct Harness {
        store: LocalStore,
        remote: Arc<MockRemote>,
        monitor: Arc<ConnectivityMonitor>,
        engine: SyncEngine<MockRemote>,
    }

    fn settings() -> SyncSettings {
        SyncSettings::default()
            .with_max_attempts(3)
            .with_backoff(Duration::from_secs(60), Duration::from_secs(600))
    }

    fn harness(remote: MockRemote, status: NetworkStatus, settings: SyncSettings) -> Harness {
        let store = LocalStore::open_in_memory(Arc::new(ManualClock::new(1_000))).unwrap();
        let remote = Arc::new(remote);
        let monitor = Arc::new(ConnectivityMonitor::new(status));
        let engine = SyncEngine::new(
            store.clone(),
            Arc::clone(&remote),
            Arc::clone(&monitor),
            settings,
        );
        Harness {
            store,
            remote,
            monitor,
            engine,
        }
    }

    fn verse(reference: &str) -> VerseRef {
        reference.parse().unwrap()
    }

    async fn reconnect(h: &Harness) {
        h.monitor.report(ConnectivitySignal::PlatformOnline);
        h.engine.wait_idle().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_create_syncs_on_reconnect() {
        let h = harness(MockRemote::new(), NetworkStatus::Offline, settings());
        let bookmark = h
            .store
            .add_bookmark("user-1", verse("John 14:27"), Some("peace".into()))
            .await
            .unwrap();

        assert_eq!(h.engine.request_drain(), DrainRequest::Suppressed);
        assert_eq!(h.store.queue_len().await.unwrap(), 1);
        assert_eq!(h.engine.sync_state(), SyncState::Offline);

        reconnect(&h).await;

        assert_eq!(h.store.queue_len().await.unwrap(), 0);
        assert_eq!(
            h.store.status_of(EntityType::Bookmark, &bookmark.id()).await.unwrap(),
            Some(SyncStatus::Synced)
        );
        assert_eq!(h.remote.call_kinds(), vec![(OperationKind::Create, bookmark.id())]);
        assert_eq!(h.engine.sync_state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeouts_exhaust_attempts_then_error() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        h.remote.fail_all(Some(RemoteError::Timeout));
        let note = h.store.add_note("user-1", verse("Psalms 13:1"), "how long").await.unwrap();
        let confirm = h.store.due_operations(1).await.unwrap().remove(0);
        h.store.confirm(&confirm).await.unwrap();
        h.store.edit_note(&note.id(), "how long, O Lord").await.unwrap();

        let mut statuses = Vec::new();
        h.engine.sync_now().await.unwrap();
        statuses.push(h.store.status_of(EntityType::Note, &note.id()).await.unwrap());
        assert!(!h.monitor.is_online());

        reconnect(&h).await;
        statuses.push(h.store.status_of(EntityType::Note, &note.id()).await.unwrap());
        reconnect(&h).await;
        statuses.push(h.store.status_of(EntityType::Note, &note.id()).await.unwrap());

        assert_eq!(
            statuses,
            vec![
                Some(SyncStatus::Pending),
                Some(SyncStatus::Pending),
                Some(SyncStatus::Error),
            ]
        );
        let ops = h.store.operations_for(EntityType::Note, &note.id()).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Update);
        assert_eq!(ops[0].attempts, 3);
        assert_eq!(ops[0].failure, Some(FailureKind::Exhausted));

        let report = h.engine.last_report().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Exhausted);
        assert_eq!(h.engine.sync_state(), SyncState::Offline);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retryable_failure_waits_for_backoff() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        let note = h.store.add_note("user-1", verse("Psalms 27:14"), "wait").await.unwrap();
        h.remote.script(note.id(), [Err(RemoteError::Network("reset".into()))]);

        let report = h.engine.sync_now().await.unwrap();

        assert_eq!(report.retried, 1);
        assert!(report.stopped_offline);
        assert_eq!(report.remaining, 1);
        let op = h.store.pending_operations(10).await.unwrap().remove(0);
        assert_eq!(op.attempts, 1);
        assert_eq!(op.next_attempt_at, 1_000 + 60_000);
        assert_eq!(op.last_error.as_deref(), Some("network error: reset"));
        assert!(h.engine.retry_armed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_then_delete_never_reaches_remote() {
        let h = harness(MockRemote::new(), NetworkStatus::Offline, settings());
        let highlight = h
            .store
            .add_highlight("user-1", verse("Isaiah 1:18"), crate::HighlightColor::Purple)
            .await
            .unwrap();
        h.store.remove_highlight(&highlight.id()).await.unwrap();

        assert_eq!(h.store.queue_len().await.unwrap(), 0);
        reconnect(&h).await;

        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn triggers_during_drain_coalesce_into_one_follow_up() {
        let h = harness(MockRemote::gated(), NetworkStatus::Online, settings());
        let note = h.store.add_note("user-1", verse("Mark 4:39"), "peace, be still").await.unwrap();

        assert_eq!(h.engine.request_drain(), DrainRequest::Started);
        h.remote.entered.notified().await;

        assert_eq!(h.engine.request_drain(), DrainRequest::FollowUpScheduled);
        assert_eq!(h.engine.request_drain(), DrainRequest::Coalesced);
        assert_eq!(h.engine.sync_state(), SyncState::Syncing);

        h.remote.release(1);
        h.engine.wait_idle().await;

        assert_eq!(h.engine.drains_completed(), 2);
        assert_eq!(h.remote.call_kinds(), vec![(OperationKind::Create, note.id())]);
        assert_eq!(h.store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_latest_change_is_dispatched() {
        let h = harness(MockRemote::new(), NetworkStatus::Offline, settings());
        let note = h.store.add_note("user-1", verse("Hebrews 11:1"), "v1").await.unwrap();
        for content in ["v2", "v3", "v4"] {
            h.store.edit_note(&note.id(), content).await.unwrap();
        }

        reconnect(&h).await;

        let calls = h.remote.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, OperationKind::Create);
        assert_eq!(calls[0].payload["content"], "v4");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn change_during_flight_is_sent_after_it() {
        let h = harness(MockRemote::gated(), NetworkStatus::Online, settings());
        let note = h.store.add_note("user-1", verse("Hebrews 12:1"), "first").await.unwrap();

        h.engine.request_drain();
        h.remote.entered.notified().await;
        h.store.edit_note(&note.id(), "second").await.unwrap();
        h.engine.request_drain();

        h.remote.release(2);
        h.engine.wait_idle().await;

        let calls = h.remote.calls();
        let payloads: Vec<_> = calls
            .iter()
            .map(|op| (op.kind, op.payload["content"].clone()))
            .collect();
        assert_eq!(
            payloads,
            vec![
                (OperationKind::Create, serde_json::json!("first")),
                (OperationKind::Update, serde_json::json!("second")),
            ]
        );
        assert_eq!(
            h.store.status_of(EntityType::Note, &note.id()).await.unwrap(),
            Some(SyncStatus::Synced)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_marks_entity_conflict() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        let note = h.store.add_note("user-1", verse("Acts 15:39"), "sharp").await.unwrap();
        h.remote.script(note.id(), [Err(RemoteError::Conflict("stale revision".into()))]);

        let report = h.engine.sync_now().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Conflict);
        assert!(report.needs_attention());
        assert_eq!(
            h.store.status_of(EntityType::Note, &note.id()).await.unwrap(),
            Some(SyncStatus::Conflict)
        );
        assert_eq!(h.store.queue_len().await.unwrap(), 1);
        assert!(h.monitor.is_online());
        assert_eq!(h.engine.sync_state(), SyncState::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejection_is_not_retried_on_reconnect() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        let note = h.store.add_note("user-1", verse("Acts 5:29"), "obey").await.unwrap();
        h.remote.script(note.id(), [Err(RemoteError::Rejected("invalid".into()))]);
        h.engine.sync_now().await.unwrap();

        h.monitor.report(ConnectivitySignal::PlatformOffline);
        reconnect(&h).await;

        assert_eq!(h.remote.calls().len(), 1);
        assert_eq!(
            h.store.status_of(EntityType::Note, &note.id()).await.unwrap(),
            Some(SyncStatus::Error)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnect_requeues_exhausted_operation() {
        let h = harness(
            MockRemote::new(),
            NetworkStatus::Online,
            settings().with_max_attempts(1),
        );
        let note = h.store.add_note("user-1", verse("Luke 18:1"), "pray").await.unwrap();
        h.remote.script(note.id(), [Err(RemoteError::Timeout)]);
        h.engine.sync_now().await.unwrap();
        assert_eq!(
            h.store.status_of(EntityType::Note, &note.id()).await.unwrap(),
            Some(SyncStatus::Error)
        );

        h.monitor.report(ConnectivitySignal::PlatformOnline);
        h.engine.wait_idle().await;

        assert_eq!(h.store.queue_len().await.unwrap(), 0);
        assert_eq!(
            h.store.status_of(EntityType::Note, &note.id()).await.unwrap(),
            Some(SyncStatus::Synced)
        );
        assert_eq!(h.remote.calls().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn explicit_retry_resends_rejected_operation() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        let note = h.store.add_note("user-1", verse("Luke 15:20"), "ran").await.unwrap();
        h.remote.script(note.id(), [Err(RemoteError::Rejected("invalid".into()))]);
        h.engine.sync_now().await.unwrap();

        assert_eq!(h.store.retry_entity(EntityType::Note, &note.id()).await.unwrap(), 1);
        let report = h.engine.sync_now().await.unwrap();

        assert_eq!(report.confirmed, 1);
        assert!(!report.needs_attention());
        let synced: Option<Note> = h.store.get(&note.id()).await.unwrap();
        assert_eq!(synced.unwrap().sync_status(), SyncStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn request_timeout_counts_as_retryable() {
        let h = harness(
            MockRemote::gated(),
            NetworkStatus::Online,
            settings().with_request_timeout(Duration::from_millis(50)),
        );
        h.store.add_note("user-1", verse("Exodus 14:14"), "be still").await.unwrap();

        let report = h.engine.sync_now().await.unwrap();

        assert_eq!(report.retried, 1);
        assert!(!h.monitor.is_online());
        let op = h.store.pending_operations(1).await.unwrap().remove(0);
        assert_eq!(op.last_error.as_deref(), Some("request timed out"));
        assert!(!op.in_flight);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrency_is_bounded() {
        let h = harness(
            MockRemote::gated(),
            NetworkStatus::Online,
            settings().with_max_in_flight(2),
        );
        for verse_number in 1..=5 {
            h.store
                .add_note("user-1", VerseRef::new("Psalms", 150, verse_number).unwrap(), "praise")
                .await
                .unwrap();
        }

        h.engine.request_drain();
        h.remote.release(5);
        h.engine.wait_idle().await;

        assert_eq!(h.remote.calls().len(), 5);
        assert!(h.remote.max_concurrent() <= 2);
        assert_eq!(h.store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn going_offline_suppresses_new_drains() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        h.monitor.report(ConnectivitySignal::PlatformOffline);
        h.engine.refresh_state();

        assert_eq!(h.engine.request_drain(), DrainRequest::Suppressed);
        assert!(matches!(h.engine.sync_now().await, Err(Error::Offline)));
        assert_eq!(h.engine.sync_state(), SyncState::Offline);
    }

    #[tokio::test]
    async fn shutdown_stops_triggers() {
        let h = harness(MockRemote::new(), NetworkStatus::Offline, settings());
        h.store.add_note("user-1", verse("Ecclesiastes 3:1"), "a season").await.unwrap();

        h.engine.shutdown().await;
        h.monitor.report(ConnectivitySignal::PlatformOnline);

        assert!(matches!(h.engine.sync_now().await, Err(Error::ShutDown)));
        assert!(h.remote.calls().is_empty());
        assert!(!h.engine.retry_armed());
        assert_eq!(h.engine.drains_completed(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rewritten_retry_gets_fresh_idempotency_key() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        let note = h.store.add_note("user-1", verse("Lamentations 3:23"), "first").await.unwrap();
        h.remote.script(note.id(), [Err(RemoteError::Timeout)]);
        h.engine.sync_now().await.unwrap();

        h.store.edit_note(&note.id(), "second").await.unwrap();
        reconnect(&h).await;

        let calls = h.remote.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, calls[1].id);
        assert_eq!(calls[0].payload["content"], "first");
        assert_eq!(calls[1].payload["content"], "second");
        assert_ne!(calls[0].idempotency_key(), calls[1].idempotency_key());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sibling_success_keeps_backoff_gate() {
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings());
        let failing = h.store.add_note("user-1", verse("Job 38:4"), "where were you").await.unwrap();
        let sibling = h.store.add_note("user-1", verse("Job 42:2"), "all things").await.unwrap();
        h.remote.script(failing.id(), [Err(RemoteError::Network("reset".into()))]);
        h.remote.slow(failing.id(), Duration::from_millis(20));
        h.remote.slow(sibling.id(), Duration::from_millis(200));

        let report = h.engine.sync_now().await.unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(report.confirmed, 1);
        let failing_calls = h
            .remote
            .calls()
            .iter()
            .filter(|op| op.entity_id == failing.id())
            .count();
        assert_eq!(failing_calls, 1);
        let op = h
            .store
            .operations_for(EntityType::Note, &failing.id())
            .await
            .unwrap()
            .remove(0);
        assert_eq!(op.attempts, 1);
        assert_eq!(op.next_attempt_at, 1_000 + 60_000);
        assert_eq!(
            h.store.status_of(EntityType::Note, &sibling.id()).await.unwrap(),
            Some(SyncStatus::Synced)
        );
        assert!(h.monitor.is_online());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn storage_error_lets_sibling_calls_finish() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("selah.db");
        let store = LocalStore::open_path(path.clone(), Arc::new(ManualClock::new(1_000))).unwrap();
        let remote = Arc::new(MockRemote::new());
        let engine = SyncEngine::new(
            store.clone(),
            Arc::clone(&remote),
            Arc::new(ConnectivityMonitor::default()),
            settings(),
        );
        let broken = store.add_note("user-1", verse("Nehemiah 4:6"), "the wall").await.unwrap();
        let sibling = store.add_note("user-1", verse("Nehemiah 6:15"), "finished").await.unwrap();
        remote.slow(broken.id(), Duration::from_millis(20));
        remote.slow(sibling.id(), Duration::from_millis(200));

        let side = rusqlite::Connection::open(&path).unwrap();
        side.execute_batch(&format!(
            "CREATE TRIGGER refuse_confirm BEFORE DELETE ON sync_queue
             WHEN OLD.entity_id = '{}'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            broken.id().as_str()
        ))
        .unwrap();

        let report = engine.sync_now().await.unwrap();

        assert!(report.aborted.is_some());
        assert_eq!(remote.calls().len(), 2);
        assert_eq!(
            store.status_of(EntityType::Note, &sibling.id()).await.unwrap(),
            Some(SyncStatus::Synced)
        );
        assert!(store.operations_for(EntityType::Note, &sibling.id()).await.unwrap().is_empty());
        let stuck = store
            .operations_for(EntityType::Note, &broken.id())
            .await
            .unwrap()
            .remove(0);
        assert!(!stuck.in_flight);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_reconnects_when_remote_answers() {
        let mut settings = settings();
        settings.probe_interval = Duration::from_millis(20);
        let h = harness(MockRemote::new(), NetworkStatus::Online, settings);
        let note = h.store.add_note("user-1", verse("Genesis 8:11"), "olive leaf").await.unwrap();
        h.remote.script(note.id(), [Err(RemoteError::Network("unreachable".into()))]);
        h.remote.fail_pings(Some(RemoteError::Network("unreachable".into())));

        h.engine.sync_now().await.unwrap();
        assert!(!h.monitor.is_online());
        assert!(h.engine.retry_armed());

        h.remote.fail_pings(None);
        tokio::time::timeout(Duration::from_secs(5), async {
            while h.store.queue_len().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        h.engine.wait_idle().await;

        assert!(h.remote.ping_count() >= 1);
        assert!(h.monitor.is_online());
        assert_eq!(
            h.store.status_of(EntityType::Note, &note.id()).await.unwrap(),
            Some(SyncStatus::Synced)
        );
    }
}
