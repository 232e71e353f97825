//! Dispatch/collect/reap machinery.
//!
//! ## Components
//!
//! - `Dispatcher`: job → outbound async call + ledger row
//! - `Collector`: ledger → poll → `complete`/`failed`
//! - `Reaper`: retries failed jobs, reclaims or exhausts stuck ones
//! - `JobQueue`: creation with synchronous dispatch, result reads, worker-gated entry points
//! - `Scheduler`: collect and reap timer loops

pub mod collector;
pub mod dispatcher;
pub mod queue;
pub mod reaper;
pub mod scheduler;

pub use collector::{CollectReport, Collector};
pub use dispatcher::{DispatchError, Dispatched, Dispatcher};
pub use queue::{JobQueue, QueueError};
pub use reaper::{ReapReport, Reaper};
pub use scheduler::{Scheduler, SchedulerHandle};
