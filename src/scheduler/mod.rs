//! Coordinator-side bookkeeping: job records, host registrations and load.
//!
//! - [`JobStore`]: durable record of every job and its lifecycle
//! - [`Registry`]: which hosts serve which service types, ranked by load
//! - [`stats`]: queue/run time aggregation per registration

pub mod job;
pub mod registry;
pub mod stats;
pub mod store;

pub use job::{Job, JobStatus};
pub use registry::{Registry, ServiceRegistration, ServiceRegistry};
pub use stats::ServiceStatistics;
pub use store::{InMemoryJobStore, JobStore};
