//! Coordinator-side dispatch of jobs to worker hosts.
//!
//! [`DispatchClient`] ranks hosts through the registry, submits to them in
//! order until one accepts, and optionally polls until the job is terminal.
//! [`Transport`] abstracts the submit/poll calls: [`HttpTransport`] for remote
//! hosts, [`LocalTransport`] for producers in the same process.

pub mod client;
pub mod transport;

pub use client::{DispatchClient, ServiceClient};
pub use transport::{HttpTransport, LocalTransport, Reply, Transport};
