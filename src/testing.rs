//! Test doubles shared by the unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::bus::{Bus, DeliveryHandler, Subscription};
use crate::error::{BusError, DatabaseError};
use crate::store::{LibSqlWorklogStore, NewWorklogItem, WorklogItem, WorklogStore, WorklogUpdate};
use crate::worker::Terminator;

/// Records every publish attempt in call order.
#[derive(Default)]
pub(crate) struct RecordingBus {
    calls: Mutex<Vec<(String, Value)>>,
    subscriptions: Mutex<Vec<(String, usize)>>,
    delay: Duration,
    failures_left: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Each publish takes `delay` before settling.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `n` publishes fail.
    pub(crate) fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<(String, usize)> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Highest number of publishes observed in flight at once.
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` publishes were attempted.
    pub(crate) async fn wait_for(&self, n: usize) -> Vec<(String, Value)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let calls = self.calls();
                if calls.len() >= n {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for publishes")
    }
}

#[async_trait]
impl Bus for RecordingBus {
    async fn publish(&self, name: &str, params: Value) -> Result<(), BusError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), params));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BusError::PublishFailed {
                name: name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        name: &str,
        concurrency: usize,
        _handler: DeliveryHandler,
    ) -> Result<Subscription, BusError> {
        self.subscriptions
            .lock()
            .unwrap()
            .push((name.to_string(), concurrency));
        Ok(Subscription::detached(name))
    }
}

/// Records termination requests instead of exiting.
#[derive(Default)]
pub(crate) struct RecordingTerminator {
    codes: Mutex<Vec<i32>>,
}

impl RecordingTerminator {
    pub(crate) fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

/// In-memory worklog store that can delay record creation and counts
/// completed finalizations.
pub(crate) struct ObservedStore {
    inner: LibSqlWorklogStore,
    create_delay: Duration,
    updates: AtomicUsize,
}

impl ObservedStore {
    pub(crate) async fn new() -> Self {
        Self {
            inner: LibSqlWorklogStore::new_memory().await.unwrap(),
            create_delay: Duration::ZERO,
            updates: AtomicUsize::new(0),
        }
    }

    /// Each record creation takes `delay` before it is written.
    pub(crate) fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Number of finalizations that have completed.
    pub(crate) fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorklogStore for ObservedStore {
    async fn create_worklog_item(&self, item: NewWorklogItem) -> Result<WorklogItem, DatabaseError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.inner.create_worklog_item(item).await
    }

    async fn update_worklog_item(
        &self,
        item: &WorklogItem,
        update: WorklogUpdate,
    ) -> Result<(), DatabaseError> {
        self.inner.update_worklog_item(item, update).await?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_worklog_item(&self, id: Uuid) -> Result<Option<WorklogItem>, DatabaseError> {
        self.inner.get_worklog_item(id).await
    }

    async fn list_worklog_items(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<WorklogItem>, DatabaseError> {
        self.inner.list_worklog_items(name, limit).await
    }
}
