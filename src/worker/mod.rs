//! Worker-side job execution.
//!
//! - [`JobProducer`]: accepts work for one service type, records it in the
//!   job store and runs it on a bounded pool
//! - [`Executor`]: the engine performing the work; [`CommandExecutor`] runs
//!   an external program such as `ffmpeg` or `ffprobe`
//!
//! # Execution Flow
//!
//! 1. [`JobProducer::submit`] creates a QUEUED job claimed for this host
//! 2. The job waits for a pool slot, then moves to RUNNING
//! 3. The executor produces a result or a failure detail
//! 4. The job moves to FINISHED or FAILED; every transition is persisted

pub mod executor;
pub mod producer;

pub use executor::{CommandExecutor, CommandPayload, Executor, Outcome};
pub use producer::{JobProducer, JobService};
