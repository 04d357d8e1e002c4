use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DispatchError, Result};
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::stats::{self, ServiceStatistics};
use crate::scheduler::store::JobStore;

/// A host's announcement that it serves one service type at one path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_type: String,
    /// Base URL of the host, e.g. `http://worker-1:8080`
    pub host: String,
    /// Path of the service endpoint on the host, e.g. `/services/encode`
    pub path: String,
    pub online: bool,
    pub maintenance: bool,
    pub job_producer: bool,
}

impl ServiceRegistration {
    pub fn new(
        service_type: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        job_producer: bool,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            host: host.into(),
            path: path.into(),
            online: true,
            maintenance: false,
            job_producer,
        }
    }

    /// Whether dispatch may route work here.
    pub fn accepts_jobs(&self) -> bool {
        self.online && !self.maintenance && self.job_producer
    }

    /// Base URL of the service endpoint.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }

    fn key(&self) -> RegistrationKey {
        (
            self.service_type.clone(),
            self.host.clone(),
            self.path.clone(),
        )
    }
}

/// (service type, host, path)
type RegistrationKey = (String, String, String);

/// Host registrations and load-based host selection.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: bool,
    ) -> Result<ServiceRegistration>;

    async fn unregister(&self, service_type: &str, host: &str, path: &str) -> Result<()>;

    async fn set_maintenance(&self, service_type: &str, host: &str, maintenance: bool)
        -> Result<()>;

    async fn set_online(&self, service_type: &str, host: &str, online: bool) -> Result<()>;

    /// Registrations able to take `service_type` work, least loaded first.
    async fn ranked_registrations(&self, service_type: &str) -> Result<Vec<ServiceRegistration>>;

    async fn statistics(&self, service_type: Option<&str>) -> Result<Vec<ServiceStatistics>>;

    /// All registrations, including offline ones and those in maintenance.
    async fn registrations(&self) -> Result<Vec<ServiceRegistration>>;

    /// Every registration of `service_type`, whatever its state.
    async fn registrations_by_type(&self, service_type: &str) -> Result<Vec<ServiceRegistration>>;

    /// Every registration on `host`, whatever its state.
    async fn registrations_by_host(&self, host: &str) -> Result<Vec<ServiceRegistration>>;

    /// The registration of `service_type` on `host`, whatever its state.
    ///
    /// With several paths registered for the pair, the lowest path wins.
    async fn registration(&self, service_type: &str, host: &str) -> Result<ServiceRegistration>;

    /// Create a job tracked on `host` itself rather than dispatched to it.
    ///
    /// The job starts RUNNING when `start` is set, QUEUED otherwise. Fails with
    /// [`DispatchError::RegistrationNotFound`] unless `host` is registered for
    /// `service_type`.
    async fn create_job(&self, service_type: &str, host: &str, start: bool) -> Result<Job>;

    /// Hosts able to take `service_type` work, least loaded first.
    async fn ranked_hosts(&self, service_type: &str) -> Result<Vec<String>> {
        Ok(self
            .ranked_registrations(service_type)
            .await?
            .into_iter()
            .map(|r| r.host)
            .collect())
    }
}

/// Registry held in process memory, ranking hosts from a shared job store.
///
/// Load is the number of QUEUED and RUNNING jobs of the service type assigned
/// to a host. Equal loads are ordered by host, then path.
pub struct ServiceRegistry {
    registrations: RwLock<BTreeMap<RegistrationKey, ServiceRegistration>>,
    store: Arc<dyn JobStore>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry").finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            registrations: RwLock::new(BTreeMap::new()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Apply `f` to every path registered for (service_type, host).
    async fn update_host<F>(&self, service_type: &str, host: &str, f: F) -> Result<()>
    where
        F: Fn(&mut ServiceRegistration),
    {
        let mut registrations = self.registrations.write().await;
        let mut found = false;
        for registration in registrations
            .values_mut()
            .filter(|r| r.service_type == service_type && r.host == host)
        {
            f(registration);
            found = true;
        }

        if found {
            Ok(())
        } else {
            Err(DispatchError::RegistrationNotFound {
                service_type: service_type.to_string(),
                host: host.to_string(),
            })
        }
    }
}

#[async_trait]
impl Registry for ServiceRegistry {
    async fn register(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: bool,
    ) -> Result<ServiceRegistration> {
        let candidate = ServiceRegistration::new(service_type, host, path, job_producer);
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .entry(candidate.key())
            .and_modify(|existing| {
                existing.job_producer = job_producer;
                existing.online = true;
            })
            .or_insert(candidate);

        tracing::info!(service_type, host, path, job_producer, "Service registered");
        Ok(registration.clone())
    }

    async fn unregister(&self, service_type: &str, host: &str, path: &str) -> Result<()> {
        let key = (service_type.to_string(), host.to_string(), path.to_string());
        if self.registrations.write().await.remove(&key).is_some() {
            tracing::info!(service_type, host, path, "Service unregistered");
        }
        Ok(())
    }

    async fn set_maintenance(
        &self,
        service_type: &str,
        host: &str,
        maintenance: bool,
    ) -> Result<()> {
        self.update_host(service_type, host, |r| r.maintenance = maintenance)
            .await?;
        tracing::info!(service_type, host, maintenance, "Maintenance mode changed");
        Ok(())
    }

    async fn set_online(&self, service_type: &str, host: &str, online: bool) -> Result<()> {
        self.update_host(service_type, host, |r| r.online = online)
            .await?;
        tracing::info!(service_type, host, online, "Online status changed");
        Ok(())
    }

    async fn ranked_registrations(&self, service_type: &str) -> Result<Vec<ServiceRegistration>> {
        // Snapshot first so the store is never queried under the registry lock
        let candidates: Vec<ServiceRegistration> = self
            .registrations
            .read()
            .await
            .values()
            .filter(|r| r.service_type == service_type && r.accepts_jobs())
            .cloned()
            .collect();

        let mut loaded = Vec::with_capacity(candidates.len());
        for registration in candidates {
            let load = self
                .store
                .count_by_type_and_status(service_type, &registration.host, &JobStatus::ACTIVE)
                .await?;
            loaded.push((load, registration));
        }

        loaded.sort_by(|(a_load, a), (b_load, b)| {
            a_load
                .cmp(b_load)
                .then_with(|| a.host.cmp(&b.host))
                .then_with(|| a.path.cmp(&b.path))
        });

        Ok(loaded.into_iter().map(|(_, r)| r).collect())
    }

    async fn statistics(&self, service_type: Option<&str>) -> Result<Vec<ServiceStatistics>> {
        let matching: Vec<ServiceRegistration> = self
            .registrations
            .read()
            .await
            .values()
            .filter(|r| service_type.map_or(true, |t| r.service_type == t))
            .cloned()
            .collect();

        // BTreeMap order already sorts by (service type, host, path)
        let mut result = Vec::with_capacity(matching.len());
        for registration in matching {
            let jobs = self
                .store
                .jobs_for(&registration.service_type, &registration.host)
                .await?;
            result.push(stats::compute(&registration, &jobs));
        }
        Ok(result)
    }

    async fn registrations(&self) -> Result<Vec<ServiceRegistration>> {
        Ok(self.registrations.read().await.values().cloned().collect())
    }

    async fn registrations_by_type(&self, service_type: &str) -> Result<Vec<ServiceRegistration>> {
        Ok(self
            .registrations
            .read()
            .await
            .values()
            .filter(|r| r.service_type == service_type)
            .cloned()
            .collect())
    }

    async fn registrations_by_host(&self, host: &str) -> Result<Vec<ServiceRegistration>> {
        Ok(self
            .registrations
            .read()
            .await
            .values()
            .filter(|r| r.host == host)
            .cloned()
            .collect())
    }

    async fn registration(&self, service_type: &str, host: &str) -> Result<ServiceRegistration> {
        self.registrations
            .read()
            .await
            .values()
            .find(|r| r.service_type == service_type && r.host == host)
            .cloned()
            .ok_or_else(|| DispatchError::RegistrationNotFound {
                service_type: service_type.to_string(),
                host: host.to_string(),
            })
    }

    async fn create_job(&self, service_type: &str, host: &str, start: bool) -> Result<Job> {
        self.registration(service_type, host).await?;

        let mut job = self.store.create(service_type).await?;
        job.assigned_host = Some(host.to_string());
        if start {
            job.start();
        }
        let job = self.store.update(&job).await?;

        tracing::info!(job_id = %job.id, service_type, host, start, "Local job created");
        Ok(job)
    }
}
