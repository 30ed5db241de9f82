//! Worker system — task execution and cron scheduling.
//!
//! Core components:
//! - `task` — handler capability, run outcomes, error rendering
//! - `worker` — per-task delivery lifecycle (worklog, ack, failure policy, piping)
//! - `scheduler` — cron timers and per-task publish serialization

pub mod scheduler;
pub mod task;
pub mod worker;

pub use scheduler::{ScheduleHandle, ScheduledJob, Scheduler};
pub use task::{RunOutcome, TaskHandler, TaskResult};
pub use worker::{
    EXIT_TEMPFAIL, ProcessTerminator, TaskRegistration, Terminator, Worker, WorkerDeps,
};
