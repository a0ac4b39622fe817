//! Cancellable one-shot timer used to wake the engine after backoff

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Holds at most one pending wake-up; scheduling replaces the previous one
#[derive(Debug, Default)]
pub struct RetryTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetryTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, cancelling any previously armed wake-up
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut slot = self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending wake-up, if any
    pub fn cancel(&self) {
        let mut slot = self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Whether a wake-up is scheduled and has not fired yet
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
