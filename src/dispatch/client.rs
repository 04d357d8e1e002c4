use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::dispatch::transport::Transport;
use crate::error::{DispatchError, Result};
use crate::scheduler::{Job, Registry, ServiceRegistration};

/// Coordinator-side entry point: sends work to the least loaded host and
/// optionally waits for it to finish.
pub struct DispatchClient {
    registry: Arc<dyn Registry>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DispatchClient {
    pub fn new(
        registry: Arc<dyn Registry>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
            cancel: None,
        }
    }

    /// Abort blocking waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Submit `payload` to the least loaded host for `service_type`.
    ///
    /// Hosts are tried in ranked order until one accepts the job. With `block`
    /// set, the accepting host is polled until the job is FINISHED or FAILED.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NoWorkersAvailable`] when no host is registered
    /// - [`DispatchError::DispatchFailed`] when every ranked host refused
    /// - [`DispatchError::PollTimeout`] / [`DispatchError::Cancelled`] while blocking
    pub async fn dispatch<P>(&self, service_type: &str, payload: &P, block: bool) -> Result<Job>
    where
        P: Serialize + ?Sized,
    {
        let (job, registration) = self.submit(service_type, payload).await?;
        if block {
            self.wait_for(&registration, job).await
        } else {
            Ok(job)
        }
    }

    /// Submit without waiting. Returns the job and the registration that accepted it.
    pub async fn submit<P>(
        &self,
        service_type: &str,
        payload: &P,
    ) -> Result<(Job, ServiceRegistration)>
    where
        P: Serialize + ?Sized,
    {
        let body =
            serde_json::to_vec(payload).map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;

        let registrations = self.registry.ranked_registrations(service_type).await?;
        if registrations.is_empty() {
            return Err(DispatchError::NoWorkersAvailable(service_type.to_string()));
        }

        for registration in &registrations {
            match self.transport.submit(registration, body.clone()).await {
                Ok(reply) if reply.is_success() => {
                    match serde_json::from_slice::<Job>(&reply.body) {
                        Ok(job) => {
                            tracing::info!(
                                job_id = %job.id,
                                service_type,
                                host = %registration.host,
                                "Job dispatched"
                            );
                            return Ok((job, registration.clone()));
                        }
                        Err(e) => {
                            tracing::warn!(
                                service_type,
                                host = %registration.host,
                                error = %e,
                                "Host returned an unreadable job, trying next host"
                            );
                        }
                    }
                }
                Ok(reply) => {
                    tracing::warn!(
                        service_type,
                        host = %registration.host,
                        status = reply.status,
                        "Host refused job, trying next host"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service_type,
                        host = %registration.host,
                        error = %e,
                        "Host unreachable, trying next host"
                    );
                }
            }
        }

        Err(DispatchError::DispatchFailed {
            service_type: service_type.to_string(),
            hosts_tried: registrations.len(),
        })
    }

    /// Poll `registration` until `job` reaches a terminal state.
    ///
    /// Failed polls are retried on the next tick; only an unknown job id ends
    /// the wait early.
    pub async fn wait_for(&self, registration: &ServiceRegistration, job: Job) -> Result<Job> {
        if job.is_terminal() {
            return Ok(job);
        }

        let job_id = job.id;
        let interval = self.config.poll_interval();
        let started = Instant::now();
        let deadline = self.config.max_wait().map(|max| started + max);

        loop {
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DispatchError::PollTimeout {
                            job_id,
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };

            match self.cancel {
                Some(ref token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(DispatchError::Cancelled(job_id)),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
                None => tokio::time::sleep(pause).await,
            }

            match self.fetch(registration, job_id).await {
                Ok(job) if job.is_terminal() => {
                    tracing::info!(job_id = %job_id, status = %job.status, "Job reached terminal state");
                    return Ok(job);
                }
                Ok(job) => {
                    tracing::debug!(job_id = %job_id, status = %job.status, "Job still in progress");
                }
                Err(DispatchError::JobNotFound(id)) => return Err(DispatchError::JobNotFound(id)),
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        host = %registration.host,
                        error = %e,
                        "Poll failed, retrying"
                    );
                }
            }
        }
    }

    /// Fetch the current state of a job from the host that accepted it.
    pub async fn fetch(&self, registration: &ServiceRegistration, job_id: Uuid) -> Result<Job> {
        let reply = self.transport.fetch(registration, job_id).await?;
        if reply.status == 404 {
            return Err(DispatchError::JobNotFound(job_id));
        }
        if !reply.is_success() {
            return Err(DispatchError::Remote {
                status: reply.status,
                message: String::from_utf8_lossy(&reply.body).to_string(),
            });
        }
        serde_json::from_slice(&reply.body)
            .map_err(|e| DispatchError::Transport(format!("unreadable job: {}", e)))
    }
}

/// A [`DispatchClient`] bound to one service type and payload type, e.g.
/// `ServiceClient<ComposePayload>` for "compose".
pub struct ServiceClient<P> {
    service_type: String,
    client: Arc<DispatchClient>,
    _payload: PhantomData<fn(&P)>,
}

impl<P> std::fmt::Debug for ServiceClient<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service_type", &self.service_type)
            .finish_non_exhaustive()
    }
}

impl<P: Serialize> ServiceClient<P> {
    pub fn new(service_type: impl Into<String>, client: Arc<DispatchClient>) -> Self {
        Self {
            service_type: service_type.into(),
            client,
            _payload: PhantomData,
        }
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub async fn dispatch(&self, payload: &P, block: bool) -> Result<Job> {
        self.client
            .dispatch(&self.service_type, payload, block)
            .await
    }
}
