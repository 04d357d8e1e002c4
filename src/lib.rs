pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod remote;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use error::{DispatchError, Result};
