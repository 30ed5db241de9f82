//! Message bus capability — publish/subscribe with per-delivery acknowledgment.
//!
//! The orchestrator only talks to the bus through the [`Bus`] trait. Task
//! starts from callers, the scheduler and the pipe router all go through
//! [`TaskStarter`], so every start travels the same publish path.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::BusError;

pub use memory::{BusStats, InMemoryBus};

/// Acknowledgment for one delivery.
///
/// Consumed by [`Ack::ack`], so a delivery can be acknowledged at most once.
/// Dropping an `Ack` without calling it reports the delivery as unacknowledged
/// to the bus that issued it.
pub struct Ack {
    on_settle: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl Ack {
    /// `on_settle` receives `true` on ack and `false` if the ack is dropped.
    pub fn new(on_settle: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            on_settle: Some(Box::new(on_settle)),
        }
    }

    pub fn noop() -> Self {
        Self { on_settle: None }
    }

    pub fn ack(mut self) {
        if let Some(settle) = self.on_settle.take() {
            settle(true);
        }
    }
}

impl Drop for Ack {
    fn drop(&mut self) {
        if let Some(settle) = self.on_settle.take() {
            settle(false);
        }
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ack")
            .field("pending", &self.on_settle.is_some())
            .finish()
    }
}

/// One message handed to a subscriber.
#[derive(Debug)]
pub struct Delivery {
    pub params: Value,
    pub ack: Ack,
}

/// Subscriber callback. The bus awaits the returned future while holding one
/// of the subscription's concurrency slots.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to an active subscription.
#[derive(Debug)]
pub struct Subscription {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
        }
    }

    /// A subscription whose lifetime is managed entirely by the bus.
    pub fn detached(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| !h.is_finished())
    }

    /// Stop receiving deliveries. In-flight deliveries run to completion.
    pub fn unsubscribe(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Backend-agnostic message bus.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Enqueue `params` for the subscribers of `name`.
    async fn publish(&self, name: &str, params: Value) -> Result<(), BusError>;

    /// Deliver messages for `name` to `handler`, at most `concurrency` at a time.
    async fn subscribe(
        &self,
        name: &str,
        concurrency: usize,
        handler: DeliveryHandler,
    ) -> Result<Subscription, BusError>;
}

/// Starts tasks by publishing them on the bus.
#[derive(Clone)]
pub struct TaskStarter {
    bus: Arc<dyn Bus>,
}

impl TaskStarter {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    pub async fn start(&self, name: &str, params: Value) -> Result<(), BusError> {
        tracing::debug!(task = %name, "starting");
        self.bus.publish(name, params).await
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }
}
