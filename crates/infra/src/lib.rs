//! Infrastructure layer: storage, HTTP transport, secrets, worker pool and
//! the dispatch/collect/reap loops.

pub mod config;
pub mod jobs;
pub mod secrets;
pub mod store;
pub mod transport;
pub mod worker_pool;


pub use config::{ConfigError, QueueConfig};
pub use jobs::{JobQueue, QueueError, Scheduler, SchedulerHandle};
pub use store::{InMemoryStore, JobStats, JobStore, PendingRequestLedger, PostgresStore, StoreError};
pub use transport::{HttpTransport, InMemoryTransport, ReqwestTransport, TransportError};
