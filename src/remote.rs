//! HTTP clients for a registry and job store hosted on another node.
//!
//! Worker nodes started with a registry URL use these in place of the
//! in-memory implementations, so their producers record jobs in the shared
//! store and the coordinator ranks them by the same counts.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::api::{
    CountResponse, CreateJobRequest, CreateLocalJobRequest, ErrorBody, RegisterRequest,
    ToggleRequest, UnregisterRequest,
};
use crate::error::{DispatchError, Result};
use crate::scheduler::{Job, JobStatus, JobStore, Registry, ServiceRegistration, ServiceStatistics};

#[derive(Debug, Clone)]
struct RemoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteClient {
    fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into an error, keeping the server's message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(DispatchError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        Ok(Self::check(response).await?.json::<T>().await?)
    }
}

/// [`JobStore`] backed by the `/jobs` endpoints of a registry node.
#[derive(Debug, Clone)]
pub struct RemoteJobStore {
    remote: RemoteClient,
}

impl RemoteJobStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            remote: RemoteClient::new(base_url, timeout)?,
        })
    }

    /// Map a 404 on a job lookup to [`DispatchError::JobNotFound`].
    fn not_found(id: Uuid, e: DispatchError) -> DispatchError {
        match e {
            DispatchError::Remote { status: 404, .. } => DispatchError::JobNotFound(id),
            other => other,
        }
    }
}

#[async_trait]
impl JobStore for RemoteJobStore {
    async fn create(&self, service_type: &str) -> Result<Job> {
        let response = self
            .remote
            .client
            .post(self.remote.url("/jobs"))
            .json(&CreateJobRequest {
                service_type: service_type.to_string(),
            })
            .send()
            .await?;
        RemoteClient::json(response).await
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let response = self
            .remote
            .client
            .put(self.remote.url(&format!("/jobs/{}", job.id)))
            .json(job)
            .send()
            .await?;
        RemoteClient::json(response)
            .await
            .map_err(|e| Self::not_found(job.id, e))
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        let response = self
            .remote
            .client
            .get(self.remote.url(&format!("/jobs/{}", id)))
            .send()
            .await?;
        RemoteClient::json(response)
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn count_by_type_and_status(
        &self,
        service_type: &str,
        host: &str,
        statuses: &[JobStatus],
    ) -> Result<usize> {
        let status = status_list(statuses);
        let response = self
            .remote
            .client
            .get(self.remote.url("/jobs/count"))
            .query(&[
                ("service_type", service_type),
                ("host", host),
                ("status", status.as_str()),
            ])
            .send()
            .await?;
        let body: CountResponse = RemoteClient::json(response).await?;
        Ok(body.count)
    }

    async fn count_by_type(&self, service_type: &str, statuses: &[JobStatus]) -> Result<usize> {
        let response = self
            .remote
            .client
            .get(self.remote.url("/jobs/count"))
            .query(&[
                ("service_type", service_type),
                ("status", status_list(statuses).as_str()),
            ])
            .send()
            .await?;
        let body: CountResponse = RemoteClient::json(response).await?;
        Ok(body.count)
    }

    async fn jobs_for(&self, service_type: &str, host: &str) -> Result<Vec<Job>> {
        let response = self
            .remote
            .client
            .get(self.remote.url("/jobs"))
            .query(&[("service_type", service_type), ("host", host)])
            .send()
            .await?;
        RemoteClient::json(response).await
    }

    async fn jobs(&self) -> Result<Vec<Job>> {
        let response = self
            .remote
            .client
            .get(self.remote.url("/jobs"))
            .send()
            .await?;
        RemoteClient::json(response).await
    }
}

fn status_list(statuses: &[JobStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// [`Registry`] backed by the `/registry` endpoints of a registry node.
#[derive(Debug, Clone)]
pub struct RemoteRegistry {
    remote: RemoteClient,
}

impl RemoteRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            remote: RemoteClient::new(base_url, timeout)?,
        })
    }

    async fn toggle(&self, path: &str, service_type: &str, host: &str, enabled: bool) -> Result<()> {
        let response = self
            .remote
            .client
            .post(self.remote.url(path))
            .json(&ToggleRequest {
                service_type: service_type.to_string(),
                host: host.to_string(),
                enabled,
            })
            .send()
            .await?;
        RemoteClient::check(response)
            .await
            .map_err(|e| Self::not_found(service_type, host, e))?;
        Ok(())
    }

    /// Map a 404 on a (type, host) lookup to [`DispatchError::RegistrationNotFound`].
    fn not_found(service_type: &str, host: &str, e: DispatchError) -> DispatchError {
        match e {
            DispatchError::Remote { status: 404, .. } => DispatchError::RegistrationNotFound {
                service_type: service_type.to_string(),
                host: host.to_string(),
            },
            other => other,
        }
    }

    async fn list(&self, query: &[(&str, &str)]) -> Result<Vec<ServiceRegistration>> {
        let response = self
            .remote
            .client
            .get(self.remote.url("/registry/registrations"))
            .query(query)
            .send()
            .await?;
        RemoteClient::json(response).await
    }
}

#[async_trait]
impl Registry for RemoteRegistry {
    async fn register(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: bool,
    ) -> Result<ServiceRegistration> {
        let response = self
            .remote
            .client
            .post(self.remote.url("/registry/register"))
            .json(&RegisterRequest {
                service_type: service_type.to_string(),
                host: host.to_string(),
                path: path.to_string(),
                job_producer,
            })
            .send()
            .await?;
        RemoteClient::json(response).await
    }

    async fn unregister(&self, service_type: &str, host: &str, path: &str) -> Result<()> {
        let response = self
            .remote
            .client
            .post(self.remote.url("/registry/unregister"))
            .json(&UnregisterRequest {
                service_type: service_type.to_string(),
                host: host.to_string(),
                path: path.to_string(),
            })
            .send()
            .await?;
        RemoteClient::check(response).await?;
        Ok(())
    }

    async fn set_maintenance(
        &self,
        service_type: &str,
        host: &str,
        maintenance: bool,
    ) -> Result<()> {
        self.toggle("/registry/maintenance", service_type, host, maintenance)
            .await
    }

    async fn set_online(&self, service_type: &str, host: &str, online: bool) -> Result<()> {
        self.toggle("/registry/online", service_type, host, online)
            .await
    }

    async fn ranked_registrations(&self, service_type: &str) -> Result<Vec<ServiceRegistration>> {
        let response = self
            .remote
            .client
            .get(self.remote.url(&format!("/registry/hosts/{}", service_type)))
            .send()
            .await?;
        RemoteClient::json(response).await
    }

    async fn statistics(&self, service_type: Option<&str>) -> Result<Vec<ServiceStatistics>> {
        let mut request = self
            .remote
            .client
            .get(self.remote.url("/registry/statistics"));
        if let Some(service_type) = service_type {
            request = request.query(&[("service_type", service_type)]);
        }
        RemoteClient::json(request.send().await?).await
    }

    async fn registrations(&self) -> Result<Vec<ServiceRegistration>> {
        self.list(&[]).await
    }

    async fn registrations_by_type(&self, service_type: &str) -> Result<Vec<ServiceRegistration>> {
        self.list(&[("service_type", service_type)]).await
    }

    async fn registrations_by_host(&self, host: &str) -> Result<Vec<ServiceRegistration>> {
        self.list(&[("host", host)]).await
    }

    async fn registration(&self, service_type: &str, host: &str) -> Result<ServiceRegistration> {
        let response = self
            .remote
            .client
            .get(self.remote.url("/registry/registration"))
            .query(&[("service_type", service_type), ("host", host)])
            .send()
            .await?;
        RemoteClient::json(response)
            .await
            .map_err(|e| Self::not_found(service_type, host, e))
    }

    async fn create_job(&self, service_type: &str, host: &str, start: bool) -> Result<Job> {
        let response = self
            .remote
            .client
            .post(self.remote.url("/registry/jobs"))
            .json(&CreateLocalJobRequest {
                service_type: service_type.to_string(),
                host: host.to_string(),
                start,
            })
            .send()
            .await?;
        RemoteClient::json(response)
            .await
            .map_err(|e| Self::not_found(service_type, host, e))
    }
}
