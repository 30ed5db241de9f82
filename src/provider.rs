//! Provider registry — named factories for bus and persistence backends.
//!
//! The orchestrator is built from either ready instances or
//! [`ProviderDescriptor`]s; descriptors are turned into instances here.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::bus::{Bus, InMemoryBus};
use crate::config::ProviderDescriptor;
use crate::error::{ConfigError, Result};
use crate::store::{LibSqlWorklogStore, WorklogStore};

/// Builds a bus from its connection settings.
pub type BusFactory = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Arc<dyn Bus>>> + Send + Sync>;

/// Builds a worklog store from its connection settings.
pub type PersistenceFactory =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Arc<dyn WorklogStore>>> + Send + Sync>;

/// Either a ready bus or a descriptor to resolve.
#[derive(Clone)]
pub enum BusSource {
    Instance(Arc<dyn Bus>),
    Descriptor(ProviderDescriptor),
}

impl From<Arc<dyn Bus>> for BusSource {
    fn from(bus: Arc<dyn Bus>) -> Self {
        Self::Instance(bus)
    }
}

impl From<ProviderDescriptor> for BusSource {
    fn from(descriptor: ProviderDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

/// Either a ready worklog store or a descriptor to resolve.
#[derive(Clone)]
pub enum PersistenceSource {
    Instance(Arc<dyn WorklogStore>),
    Descriptor(ProviderDescriptor),
}

impl From<Arc<dyn WorklogStore>> for PersistenceSource {
    fn from(store: Arc<dyn WorklogStore>) -> Self {
        Self::Instance(store)
    }
}

impl From<ProviderDescriptor> for PersistenceSource {
    fn from(descriptor: ProviderDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

/// Named bus and persistence factories.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    buses: HashMap<String, BusFactory>,
    persistence: HashMap<String, PersistenceFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the bundled providers: bus `memory`, persistence `libsql`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_bus("memory", |_connection| async {
            Ok(Arc::new(InMemoryBus::new()) as Arc<dyn Bus>)
        });
        registry.register_persistence("libsql", |connection| async move {
            let path = libsql_path(&connection)?;
            let store = if path == ":memory:" {
                LibSqlWorklogStore::new_memory().await?
            } else {
                LibSqlWorklogStore::new_local(Path::new(&path)).await?
            };
            Ok(Arc::new(store) as Arc<dyn WorklogStore>)
        });
        registry
    }

    pub fn register_bus<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Bus>>> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(provider = %name, "registered bus provider");
        let factory: BusFactory =
            Arc::new(move |connection: Value| -> BoxFuture<'static, Result<Arc<dyn Bus>>> {
                Box::pin(factory(connection))
            });
        self.buses.insert(name, factory);
    }

    pub fn register_persistence<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn WorklogStore>>> + Send + 'static,
    {
        let name = name.into();
        tracing::debug!(provider = %name, "registered persistence provider");
        let factory: PersistenceFactory =
            Arc::new(move |connection: Value| -> BoxFuture<'static, Result<Arc<dyn WorklogStore>>> {
                Box::pin(factory(connection))
            });
        self.persistence.insert(name, factory);
    }

    pub async fn resolve_bus(&self, source: BusSource) -> Result<Arc<dyn Bus>> {
        match source {
            BusSource::Instance(bus) => Ok(bus),
            BusSource::Descriptor(desc) => {
                let factory = self.buses.get(&desc.name).ok_or_else(|| unknown("bus", &desc))?;
                tracing::info!(provider = %desc.name, "connecting bus");
                factory(desc.connection).await
            }
        }
    }

    pub async fn resolve_persistence(
        &self,
        source: PersistenceSource,
    ) -> Result<Arc<dyn WorklogStore>> {
        match source {
            PersistenceSource::Instance(store) => Ok(store),
            PersistenceSource::Descriptor(desc) => {
                let factory = self
                    .persistence
                    .get(&desc.name)
                    .ok_or_else(|| unknown("persistence", &desc))?;
                tracing::info!(provider = %desc.name, "connecting persistence");
                factory(desc.connection).await
            }
        }
    }
}

fn unknown(kind: &str, desc: &ProviderDescriptor) -> ConfigError {
    ConfigError::UnknownProvider {
        kind: kind.to_string(),
        name: desc.name.clone(),
    }
}

/// `{"path": "..."}`, defaulting to an in-memory database.
fn libsql_path(connection: &Value) -> std::result::Result<String, ConfigError> {
    match connection {
        Value::Null => Ok(":memory:".to_string()),
        Value::Object(map) => match map.get("path") {
            None | Some(Value::Null) => Ok(":memory:".to_string()),
            Some(Value::String(path)) if !path.trim().is_empty() => Ok(path.clone()),
            Some(other) => Err(ConfigError::InvalidValue {
                key: "libsql.path".to_string(),
                message: format!("expected a non-empty string, got {other}"),
            }),
        },
        other => Err(ConfigError::InvalidValue {
            key: "libsql".to_string(),
            message: format!("expected an object connection, got {other}"),
        }),
    }
}
