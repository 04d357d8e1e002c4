use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, RwLock, Semaphore};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::ProducerConfig;
use crate::error::{DispatchError, Result};
use crate::scheduler::{Job, JobStore};
use crate::worker::executor::Executor;

/// Type-erased view of a producer, used by the HTTP layer and the in-process transport.
#[async_trait]
pub trait JobService: Send + Sync {
    fn service_type(&self) -> &str;

    /// Deserialize a payload and submit it.
    async fn submit_raw(&self, body: &[u8]) -> Result<Job>;

    async fn get(&self, id: Uuid) -> Result<Job>;
}

/// Accepts work for one service type on this host and runs it on a bounded pool.
///
/// Every job is created in the store as QUEUED and claimed for this host before
/// `submit` returns. Execution moves it to RUNNING and then FINISHED or FAILED,
/// persisting each transition.
pub struct JobProducer<E: Executor> {
    service_type: String,
    host: String,
    store: Arc<dyn JobStore>,
    executor: Arc<E>,
    pool: Arc<Semaphore>,
    pool_size: usize,
    /// `false` once draining. Held for reading from job creation to spawn.
    intake: RwLock<bool>,
    tasks: TaskTracker,
}

impl<E: Executor> std::fmt::Debug for JobProducer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProducer")
            .field("service_type", &self.service_type)
            .field("host", &self.host)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

impl<E: Executor> JobProducer<E> {
    pub fn new(
        service_type: impl Into<String>,
        host: impl Into<String>,
        store: Arc<dyn JobStore>,
        executor: E,
        config: ProducerConfig,
    ) -> Self {
        let pool_size = config.pool_size.max(1);
        Self {
            service_type: service_type.into(),
            host: host.into(),
            store,
            executor: Arc::new(executor),
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            intake: RwLock::new(true),
            tasks: TaskTracker::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of jobs currently holding a pool slot.
    pub fn in_flight(&self) -> usize {
        self.pool_size - self.pool.available_permits()
    }

    /// Accept `payload` and return the QUEUED job without waiting for execution.
    pub async fn submit(&self, payload: E::Payload) -> Result<Job> {
        let (job, _done) = self.enqueue(payload).await?;
        Ok(job)
    }

    /// Accept `payload` and wait for the job to reach a terminal state.
    pub async fn submit_and_wait(&self, payload: E::Payload) -> Result<Job> {
        let (job, done) = self.enqueue(payload).await?;
        done.await.map_err(|_| {
            DispatchError::Internal(format!("execution task for job {} ended early", job.id))
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        let job = self.store.get(id).await?;
        if job.service_type != self.service_type {
            return Err(DispatchError::JobNotFound(id));
        }
        Ok(job)
    }

    /// Stop accepting new execution tasks and wait for the scheduled ones to finish.
    ///
    /// Submissions already past the intake check are spawned before the
    /// tracker closes, so every accepted job is waited for.
    pub async fn drain(&self) {
        *self.intake.write().await = false;
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!(service_type = %self.service_type, "Producer drained");
    }

    async fn enqueue(&self, payload: E::Payload) -> Result<(Job, oneshot::Receiver<Job>)> {
        let open = self.intake.read().await;
        if !*open {
            return Err(DispatchError::Internal(format!(
                "producer for {} is shutting down",
                self.service_type
            )));
        }

        let mut job = self.store.create(&self.service_type).await?;
        job.assigned_host = Some(self.host.clone());
        let job = self.store.update(&job).await?;

        tracing::info!(
            job_id = %job.id,
            service_type = %self.service_type,
            host = %self.host,
            "Job accepted"
        );

        let (tx, rx) = oneshot::channel();
        let store = self.store.clone();
        let executor = self.executor.clone();
        let pool = self.pool.clone();
        let queued = job.clone();
        self.tasks.spawn(async move {
            let finished = run_job(store, executor, pool, queued, payload).await;
            // Receiver is gone when the caller did not wait
            let _ = tx.send(finished);
        });
        drop(open);

        Ok((job, rx))
    }
}

async fn run_job<E: Executor>(
    store: Arc<dyn JobStore>,
    executor: Arc<E>,
    pool: Arc<Semaphore>,
    mut job: Job,
    payload: E::Payload,
) -> Job {
    let _permit = match pool.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            job.fail("worker pool closed before the job could start");
            persist(store.as_ref(), &mut job).await;
            return job;
        }
    };

    job.start();
    persist(store.as_ref(), &mut job).await;

    // A panicking executor fails the job
    let running = job.clone();
    let outcome = tokio::spawn(async move { executor.execute(&running, payload).await }).await;

    match outcome {
        Ok(Ok(result)) => {
            job.succeed(result);
        }
        Ok(Err(detail)) => {
            tracing::warn!(job_id = %job.id, error = %detail, "Job failed");
            job.fail(detail);
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Executor panicked");
            job.fail(format!("executor panicked: {}", e));
        }
    }

    persist(store.as_ref(), &mut job).await;
    tracing::info!(job_id = %job.id, status = %job.status, "Job completed");
    job
}

/// Write `job` to the store and adopt the stored record.
async fn persist(store: &dyn JobStore, job: &mut Job) {
    match store.update(job).await {
        Ok(stored) => *job = stored,
        Err(e) => {
            tracing::error!(
                job_id = %job.id,
                status = %job.status,
                error = %e,
                "Failed to persist job status"
            );
        }
    }
}

#[async_trait]
impl<E: Executor> JobService for JobProducer<E> {
    fn service_type(&self) -> &str {
        &self.service_type
    }

    async fn submit_raw(&self, body: &[u8]) -> Result<Job> {
        let payload: E::Payload = serde_json::from_slice(body)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        self.submit(payload).await
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        JobProducer::get(self, id).await
    }
}
