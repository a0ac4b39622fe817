//! Scripted remote store for engine tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};

use super::remote::{RemoteError, RemoteRecord, RemoteStore};
use crate::models::{EntityId, OperationKind, SyncOperation};

/// Remote that answers from per-entity scripts and records every call
#[derive(Default)]
pub struct MockRemote {
    scripts: Mutex<HashMap<EntityId, VecDeque<Result<(), RemoteError>>>>,
    fallback: Mutex<Option<RemoteError>>,
    delays: Mutex<HashMap<EntityId, Duration>>,
    calls: Mutex<Vec<SyncOperation>>,
    gate: Option<Semaphore>,
    /// Signalled whenever a call starts
    pub entered: Notify,
    ping_result: Mutex<Option<RemoteError>>,
    pings: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls block until [`MockRemote::release`] hands out permits
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Queue results for the next calls touching `entity_id`
    pub fn script(&self, entity_id: EntityId, results: impl IntoIterator<Item = Result<(), RemoteError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(entity_id)
            .or_default()
            .extend(results);
    }

    /// Hold calls touching `entity_id` for `delay` before answering
    pub fn slow(&self, entity_id: EntityId, delay: Duration) {
        self.delays.lock().unwrap().insert(entity_id, delay);
    }

    /// Fail every unscripted call with `error`; `None` accepts them
    pub fn fail_all(&self, error: Option<RemoteError>) {
        *self.fallback.lock().unwrap() = error;
    }

    pub fn fail_pings(&self, error: Option<RemoteError>) {
        *self.ping_result.lock().unwrap() = error;
    }

    pub fn calls(&self) -> Vec<SyncOperation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_kinds(&self) -> Vec<(OperationKind, EntityId)> {
        self.calls()
            .into_iter()
            .map(|op| (op.kind, op.entity_id))
            .collect()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_result(&self, entity_id: EntityId) -> Result<(), RemoteError> {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&entity_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(result) => result,
            None => self.fallback.lock().unwrap().clone().map_or(Ok(()), Err),
        }
    }
}

impl RemoteStore for MockRemote {
    async fn apply(&self, operation: &SyncOperation) -> Result<RemoteRecord, RemoteError> {
        self.calls.lock().unwrap().push(operation.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let delay = self.delays.lock().unwrap().get(&operation.entity_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.next_result(operation.entity_id);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result.map(|()| RemoteRecord {
            id: operation.entity_id.as_str(),
            updated_at: Some(operation.created_at),
        })
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.ping_result.lock().unwrap().clone().map_or(Ok(()), Err)
    }
}
