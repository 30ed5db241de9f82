//! joba — cron-driven job orchestration over a message bus.
//!
//! Tasks are published on a [`bus::Bus`], run by registered handlers, recorded
//! in a worklog, and their results piped into downstream tasks.

pub mod bus;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipe;
pub mod provider;
pub mod store;
pub mod worker;
pub mod worklog;

#[cfg(test)]
mod testing;

pub use bus::{Ack, Bus, Delivery, InMemoryBus, Subscription};
pub use config::{HandleOptions, JobaConfig, ProviderDescriptor};
pub use error::{Error, Result};
pub use orchestrator::{Joba, JobaBuilder};
pub use pipe::Destination;
pub use provider::{BusSource, PersistenceSource, ProviderRegistry};
pub use store::{LibSqlWorklogStore, WorklogItem, WorklogStore};
pub use worker::{EXIT_TEMPFAIL, RunOutcome, ScheduleHandle, TaskHandler, TaskResult, Terminator};
