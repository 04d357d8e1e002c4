use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::scheduler::ServiceRegistration;
use crate::worker::JobService;

/// Raw response of a submit or poll call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn from_result(result: Result<impl serde::Serialize>) -> Self {
        match result {
            Ok(value) => match serde_json::to_vec(&value) {
                Ok(body) => Reply { status: 200, body },
                Err(e) => Reply::error(&DispatchError::Internal(e.to_string())),
            },
            Err(e) => Reply::error(&e),
        }
    }

    fn error(e: &DispatchError) -> Self {
        let body = serde_json::json!({ "error": e.to_string() });
        Reply {
            status: e.http_status(),
            body: body.to_string().into_bytes(),
        }
    }
}

/// Request/response calls to a job-producing host.
///
/// Only connection-level problems are errors; any response from the host,
/// successful or not, is returned as a [`Reply`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a serialized payload to the registration's submit endpoint.
    async fn submit(&self, registration: &ServiceRegistration, body: Vec<u8>) -> Result<Reply>;

    /// Fetch the current state of a job from the registration's poll endpoint.
    async fn fetch(&self, registration: &ServiceRegistration, job_id: Uuid) -> Result<Reply>;
}

/// HTTP transport: `POST {endpoint}/jobs` and `GET {endpoint}/jobs/{id}`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn into_reply(response: reqwest::Response) -> Result<Reply> {
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(Reply { status, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, registration: &ServiceRegistration, body: Vec<u8>) -> Result<Reply> {
        let url = format!("{}/jobs", registration.endpoint());
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Self::into_reply(response).await
    }

    async fn fetch(&self, registration: &ServiceRegistration, job_id: Uuid) -> Result<Reply> {
        let url = format!("{}/jobs/{}", registration.endpoint(), job_id);
        let response = self.client.get(&url).send().await?;
        Self::into_reply(response).await
    }
}

/// In-process transport routing calls straight to producers in this process.
#[derive(Default)]
pub struct LocalTransport {
    routes: RwLock<HashMap<(String, String), Arc<dyn JobService>>>,
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport").finish_non_exhaustive()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route calls for (host, path) to `service`.
    pub async fn add_route(
        &self,
        host: impl Into<String>,
        path: impl Into<String>,
        service: Arc<dyn JobService>,
    ) {
        self.routes
            .write()
            .await
            .insert((host.into(), path.into()), service);
    }

    pub async fn remove_route(&self, host: &str, path: &str) {
        self.routes
            .write()
            .await
            .remove(&(host.to_string(), path.to_string()));
    }

    async fn route(&self, registration: &ServiceRegistration) -> Result<Arc<dyn JobService>> {
        self.routes
            .read()
            .await
            .get(&(registration.host.clone(), registration.path.clone()))
            .cloned()
            .ok_or_else(|| {
                DispatchError::Transport(format!("no route to {}", registration.endpoint()))
            })
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn submit(&self, registration: &ServiceRegistration, body: Vec<u8>) -> Result<Reply> {
        let service = self.route(registration).await?;
        Ok(Reply::from_result(service.submit_raw(&body).await))
    }

    async fn fetch(&self, registration: &ServiceRegistration, job_id: Uuid) -> Result<Reply> {
        let service = self.route(registration).await?;
        Ok(Reply::from_result(service.get(job_id).await))
    }
}
