use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    /// Statuses that count against a host's load.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Queued, JobStatus::Running];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Whether a stored job in `self` may be overwritten with `next`.
    ///
    /// Same-status writes are allowed for non-terminal jobs so a producer can
    /// claim a queued job or attach progress without changing its state. A
    /// job must run before it can finish; it may fail without running.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Finished | Failed, _) => false,
            (Queued, Queued | Running | Failed) => true,
            (Queued, Finished) => false,
            (Running, Running | Finished | Failed) => true,
            (Running, Queued) => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// One dispatched unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub service_type: String,
    pub assigned_host: Option<String>,
    pub status: JobStatus,
    /// Result on success, failure detail on failure.
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), service_type, Utc::now())
    }

    pub fn with_id(id: Uuid, service_type: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            service_type: service_type.into(),
            assigned_host: None,
            status: JobStatus::Queued,
            payload: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// QUEUED -> RUNNING. Returns false and leaves the job untouched otherwise.
    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// RUNNING -> FINISHED with the produced result.
    pub fn succeed(&mut self, result: Option<String>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Finished;
        self.payload = result;
        self.completed_at = Some(Utc::now());
        true
    }

    /// RUNNING or QUEUED -> FAILED with the failure detail.
    ///
    /// A job failing before it started keeps `started_at` empty and is left
    /// out of run-time statistics.
    pub fn fail(&mut self, detail: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.payload = Some(detail.into());
        self.completed_at = Some(Utc::now());
        true
    }

    /// Time spent queued, once the job has started.
    pub fn queue_time_ms(&self) -> Option<i64> {
        self.started_at
            .map(|started| (started - self.created_at).num_milliseconds())
    }

    /// Time spent running, once the job has completed.
    pub fn run_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }
}
