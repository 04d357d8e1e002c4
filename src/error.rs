use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No workers available for service type {0}")]
    NoWorkersAvailable(String),

    #[error("Dispatch of {service_type} job failed, none of the {hosts_tried} hosts accepted it")]
    DispatchFailed {
        service_type: String,
        hosts_tried: usize,
    },

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    IllegalTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("No registration for service type {service_type} on host {host}")]
    RegistrationNotFound { service_type: String, host: String },

    #[error("Job store is at capacity ({0} jobs)")]
    StoreFull(usize),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Job {job_id} did not reach a terminal state within {waited_ms}ms")]
    PollTimeout { job_id: Uuid, waited_ms: u64 },

    #[error("Wait for job {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// HTTP status used when this error crosses the wire.
    pub fn http_status(&self) -> u16 {
        match self {
            DispatchError::JobNotFound(_) | DispatchError::RegistrationNotFound { .. } => 404,
            DispatchError::InvalidPayload(_) => 400,
            DispatchError::IllegalTransition { .. } => 409,
            DispatchError::NoWorkersAvailable(_)
            | DispatchError::DispatchFailed { .. }
            | DispatchError::StoreFull(_) => 503,
            DispatchError::PollTimeout { .. } => 504,
            DispatchError::Remote { status, .. } => *status,
            DispatchError::Cancelled(_)
            | DispatchError::Transport(_)
            | DispatchError::Internal(_) => 500,
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        DispatchError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
