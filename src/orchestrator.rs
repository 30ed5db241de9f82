//! The orchestrator facade: one instance owns the publish chains, the pipe
//! registry and the handler wiring for a bus + worklog store pair.

use std::sync::Arc;

use serde_json::Value;

use crate::bus::{Bus, Subscription, TaskStarter};
use crate::config::HandleOptions;
use crate::error::{BusError, ConfigError, Result, ScheduleError};
use crate::pipe::{Destination, PipeRouter};
use crate::provider::{BusSource, PersistenceSource, ProviderRegistry};
use crate::store::WorklogStore;
use crate::worker::{
    ProcessTerminator, ScheduleHandle, Scheduler, TaskHandler, TaskRegistration, Terminator,
    Worker, WorkerDeps,
};
use crate::worklog::WorklogRecorder;

/// Builder for [`Joba`].
pub struct JobaBuilder {
    bus: Option<BusSource>,
    persistence: Option<PersistenceSource>,
    registry: ProviderRegistry,
    terminator: Arc<dyn Terminator>,
}

impl Default for JobaBuilder {
    fn default() -> Self {
        Self {
            bus: None,
            persistence: None,
            registry: ProviderRegistry::with_builtins(),
            terminator: Arc::new(ProcessTerminator),
        }
    }
}

impl JobaBuilder {
    pub fn bus(mut self, bus: impl Into<BusSource>) -> Self {
        self.bus = Some(bus.into());
        self
    }

    pub fn persistence(mut self, persistence: impl Into<PersistenceSource>) -> Self {
        self.persistence = Some(persistence.into());
        self
    }

    /// Replace the provider registry used to resolve descriptors.
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace how fatal task failures end the process.
    pub fn terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub async fn build(self) -> Result<Joba> {
        let bus_source = self.bus.ok_or_else(|| ConfigError::MissingRequired {
            key: "bus".to_string(),
            hint: "Pass a bus instance or provider descriptor to JobaBuilder::bus".to_string(),
        })?;
        let persistence_source = self.persistence.ok_or_else(|| ConfigError::MissingRequired {
            key: "persistence".to_string(),
            hint: "Pass a worklog store or provider descriptor to JobaBuilder::persistence"
                .to_string(),
        })?;

        let bus = self.registry.resolve_bus(bus_source).await?;
        let store = self.registry.resolve_persistence(persistence_source).await?;

        let starter = TaskStarter::new(Arc::clone(&bus));
        tracing::info!("orchestrator ready");
        Ok(Joba {
            scheduler: Scheduler::new(starter.clone()),
            pipes: Arc::new(PipeRouter::new(starter.clone())),
            recorder: WorklogRecorder::new(store),
            terminator: self.terminator,
            starter,
            bus,
        })
    }
}

/// Cron-driven job orchestrator.
pub struct Joba {
    bus: Arc<dyn Bus>,
    starter: TaskStarter,
    scheduler: Scheduler,
    pipes: Arc<PipeRouter>,
    recorder: WorklogRecorder,
    terminator: Arc<dyn Terminator>,
}

impl Joba {
    pub fn builder() -> JobaBuilder {
        JobaBuilder::default()
    }

    /// Start `name` with `params` every time `cron_expression` fires.
    pub fn schedule(
        &self,
        cron_expression: &str,
        name: &str,
        params: Value,
    ) -> std::result::Result<ScheduleHandle, ScheduleError> {
        self.scheduler.schedule(cron_expression, name, params)
    }

    /// Publish one run of `name` now.
    pub async fn start(&self, name: &str, params: Value) -> std::result::Result<(), BusError> {
        self.starter.start(name, params).await
    }

    /// Route successful results of `source` to `destination`.
    pub async fn pipe(&self, source: &str, destination: Destination) {
        self.pipes.add(source, destination).await;
    }

    /// Like [`Joba::pipe`], taking the loose JSON destination form. Returns
    /// `false` if the shape was not recognized and nothing was registered.
    pub async fn pipe_value(&self, source: &str, destination: &Value) -> bool {
        self.pipes.add_value(source, destination).await
    }

    /// Run `handler` for every delivery of `name`.
    pub async fn handle(
        &self,
        name: &str,
        handler: impl TaskHandler + 'static,
        options: HandleOptions,
    ) -> std::result::Result<Subscription, BusError> {
        let worker = Worker::new(
            TaskRegistration {
                name: name.to_string(),
                handler: Arc::new(handler),
                options,
            },
            WorkerDeps {
                recorder: self.recorder.clone(),
                pipes: Arc::clone(&self.pipes),
                terminator: Arc::clone(&self.terminator),
            },
        );
        worker.subscribe(self.bus.as_ref()).await
    }

    pub fn worklog(&self) -> &Arc<dyn WorklogStore> {
        self.recorder.store()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn pipes(&self) -> &PipeRouter {
        &self.pipes
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::ProviderDescriptor;
    use crate::error::Error;
    use crate::store::LibSqlWorklogStore;
    use crate::testing::RecordingBus;

    async fn memory_store() -> Arc<dyn WorklogStore> {
        Arc::new(LibSqlWorklogStore::new_memory().await.unwrap())
    }

    #[tokio::test]
    async fn missing_bus_is_fatal() {
        let err = Joba::builder()
            .persistence(memory_store().await)
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingRequired { ref key, .. }) if key == "bus"
        ));
    }

    #[tokio::test]
    async fn missing_persistence_is_fatal() {
        let err = Joba::builder()
            .bus(ProviderDescriptor::new("memory", Value::Null))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingRequired { ref key, .. }) if key == "persistence"
        ));
    }

    #[tokio::test]
    async fn builds_from_descriptors() {
        let joba = Joba::builder()
            .bus(ProviderDescriptor::new("memory", Value::Null))
            .persistence(ProviderDescriptor::new("libsql", json!({"path": ":memory:"})))
            .build()
            .await
            .unwrap();
        assert!(
            joba.worklog()
                .list_worklog_items("any", 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn start_and_handle_go_through_the_bus() {
        let bus = Arc::new(RecordingBus::new());
        let joba = Joba::builder()
            .bus(bus.clone() as Arc<dyn Bus>)
            .persistence(memory_store().await)
            .build()
            .await
            .unwrap();

        joba.start("ingest", json!({"day": 1})).await.unwrap();
        let handler = |_params: Value| async { Ok::<_, anyhow::Error>(Value::Null) };
        joba.handle("ingest", handler, HandleOptions::default().with_concurrency(3))
            .await
            .unwrap();

        assert_eq!(bus.calls(), vec![("ingest".to_string(), json!({"day": 1}))]);
        assert_eq!(bus.subscriptions(), vec![("ingest".to_string(), 3)]);
    }

    #[tokio::test]
    async fn pipe_value_drops_unknown_shapes() {
        let joba = Joba::builder()
            .bus(Arc::new(RecordingBus::new()) as Arc<dyn Bus>)
            .persistence(memory_store().await)
            .build()
            .await
            .unwrap();

        assert!(!joba.pipe_value("a", &json!({"opcode": "zip", "names": ["b"]})).await);
        assert!(joba.pipe_value("a", &json!({"opcode": "map", "names": ["b"]})).await);
        joba.pipe("a", Destination::direct("c")).await;
        assert_eq!(
            joba.pipes().destinations("a").await,
            vec![Destination::map("b"), Destination::direct("c")]
        );
    }

    #[tokio::test]
    async fn schedule_rejects_bad_cron() {
        let joba = Joba::builder()
            .bus(Arc::new(RecordingBus::new()) as Arc<dyn Bus>)
            .persistence(memory_store().await)
            .build()
            .await
            .unwrap();
        assert!(joba.schedule("every day", "report", Value::Null).is_err());
    }
}
