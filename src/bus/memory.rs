//! In-process bus: one unbounded queue per task name, competing consumers.
//!
//! Messages published before anyone subscribes stay queued until a
//! subscriber attaches. Nothing is redelivered.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tracing::{debug, warn};

use super::{Ack, Bus, Delivery, DeliveryHandler, Subscription};
use crate::error::BusError;

struct Topic {
    tx: mpsc::UnboundedSender<Value>,
    rx: Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicUsize,
    acked: AtomicUsize,
    unacked: AtomicUsize,
}

/// Delivery accounting snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    pub published: usize,
    pub acked: usize,
    pub unacked: usize,
}

/// In-memory bus backed by tokio channels.
#[derive(Default)]
pub struct InMemoryBus {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    counters: Arc<Counters>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::SeqCst),
            acked: self.counters.acked.load(Ordering::SeqCst),
            unacked: self.counters.unacked.load(Ordering::SeqCst),
        }
    }

    async fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.read().await.get(name) {
            return Arc::clone(topic);
        }
        let mut topics = self.topics.write().await;
        Arc::clone(
            topics
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Topic::new())),
        )
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, name: &str, params: Value) -> Result<(), BusError> {
        let topic = self.topic(name).await;
        topic.tx.send(params).map_err(|_| BusError::Closed)?;
        self.counters.published.fetch_add(1, Ordering::SeqCst);
        debug!(task = %name, "published");
        Ok(())
    }

    async fn subscribe(
        &self,
        name: &str,
        concurrency: usize,
        handler: DeliveryHandler,
    ) -> Result<Subscription, BusError> {
        let topic = self.topic(name).await;
        let slots = Arc::new(Semaphore::new(concurrency.max(1)));
        let counters = Arc::clone(&self.counters);
        let task = name.to_string();

        let handle = tokio::spawn(async move {
            loop {
                let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                    break;
                };
                let params = { topic.rx.lock().await.recv().await };
                let Some(params) = params else {
                    break;
                };

                let counters = Arc::clone(&counters);
                let name = task.clone();
                let ack = Ack::new(move |acked| {
                    if acked {
                        counters.acked.fetch_add(1, Ordering::SeqCst);
                    } else {
                        counters.unacked.fetch_add(1, Ordering::SeqCst);
                        warn!(task = %name, "delivery finished without ack");
                    }
                });

                let work = handler(Delivery { params, ack });
                tokio::spawn(async move {
                    work.await;
                    drop(permit);
                });
            }
        });

        debug!(task = %name, concurrency, "subscribed");
        Ok(Subscription::new(name, handle))
    }
}
