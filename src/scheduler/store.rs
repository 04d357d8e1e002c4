use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::scheduler::job::{Job, JobStatus};

const DEFAULT_MAX_JOBS: usize = 100_000;

/// Storage for job records. The single source of truth for job status.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a new QUEUED job with no assigned host.
    async fn create(&self, service_type: &str) -> Result<Job>;

    /// Persist `job`, rejecting backward transitions and writes to terminal jobs.
    ///
    /// Returns the stored record. `started_at` and `completed_at` are owned by
    /// the store: set on entering RUNNING or a terminal state, never cleared.
    async fn update(&self, job: &Job) -> Result<Job>;

    async fn get(&self, id: Uuid) -> Result<Job>;

    async fn count_by_type_and_status(
        &self,
        service_type: &str,
        host: &str,
        statuses: &[JobStatus],
    ) -> Result<usize>;

    /// Jobs of `service_type` in any of `statuses`, across all hosts.
    async fn count_by_type(&self, service_type: &str, statuses: &[JobStatus]) -> Result<usize>;

    /// Jobs of `service_type` assigned to `host`.
    async fn jobs_for(&self, service_type: &str, host: &str) -> Result<Vec<Job>>;

    /// All jobs sorted chronologically by creation time.
    async fn jobs(&self) -> Result<Vec<Job>>;
}

/// Job store kept in process memory.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    max_jobs: usize,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_jobs,
        }
    }

    /// Insert a job as-is. Returns false if the store is at capacity or the id exists.
    pub async fn insert(&self, job: Job) -> bool {
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_jobs || jobs.contains_key(&job.id) {
            return false;
        }
        jobs.insert(job.id, job);
        true
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, service_type: &str) -> Result<Job> {
        let job = Job::new(service_type);
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_jobs {
            return Err(DispatchError::StoreFull(self.max_jobs));
        }
        jobs.insert(job.id, job.clone());
        tracing::debug!(job_id = %job.id, service_type, "Job created");
        Ok(job)
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(DispatchError::JobNotFound(job.id))?;

        if !stored.status.can_transition_to(job.status) {
            return Err(DispatchError::IllegalTransition {
                job_id: job.id,
                from: stored.status,
                to: job.status,
            });
        }

        // Timestamps are set once, when the job enters RUNNING or a terminal
        // state, and never cleared afterwards
        let now = Utc::now();
        if job.status == JobStatus::Running && stored.started_at.is_none() {
            stored.started_at = Some(job.started_at.unwrap_or(now));
        }
        if job.status.is_terminal() && stored.completed_at.is_none() {
            stored.completed_at = Some(job.completed_at.unwrap_or(now));
        }
        stored.status = job.status;
        stored.assigned_host = job.assigned_host.clone();
        stored.payload = job.payload.clone();

        tracing::debug!(job_id = %job.id, status = %job.status, "Job updated");
        Ok(stored.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DispatchError::JobNotFound(id))
    }

    async fn count_by_type_and_status(
        &self,
        service_type: &str,
        host: &str,
        statuses: &[JobStatus],
    ) -> Result<usize> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.service_type == service_type)
            .filter(|j| j.assigned_host.as_deref() == Some(host))
            .filter(|j| statuses.contains(&j.status))
            .count())
    }

    async fn count_by_type(&self, service_type: &str, statuses: &[JobStatus]) -> Result<usize> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.service_type == service_type && statuses.contains(&j.status))
            .count())
    }

    async fn jobs_for(&self, service_type: &str, host: &str) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.service_type == service_type)
            .filter(|j| j.assigned_host.as_deref() == Some(host))
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.created_at);
        Ok(matching)
    }

    async fn jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}
