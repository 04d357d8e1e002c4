use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{self, RegistryState, WorkerState};
use crate::config::NodeConfig;
use crate::dispatch::{DispatchClient, Transport};
use crate::error::Result;
use crate::remote::{RemoteJobStore, RemoteRegistry};
use crate::scheduler::{InMemoryJobStore, JobStore, Registry, ServiceRegistry};
use crate::worker::{CommandExecutor, JobProducer, JobService};

/// A process in the fleet: hosts job producers and, optionally, the registry.
///
/// A node started without a registry URL owns the registry and the job store
/// and serves them to other nodes. Otherwise it uses the remote registry and
/// store of the node at that URL.
pub struct Node {
    pub config: NodeConfig,
    pub registry: Arc<dyn Registry>,
    pub store: Arc<dyn JobStore>,
    pub producers: Vec<Arc<JobProducer<CommandExecutor>>>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let (registry, store): (Arc<dyn Registry>, Arc<dyn JobStore>) = match config.registry_url
        {
            Some(ref url) => {
                let timeout = config.dispatch.request_timeout();
                (
                    Arc::new(RemoteRegistry::new(url.clone(), timeout)?),
                    Arc::new(RemoteJobStore::new(url.clone(), timeout)?),
                )
            }
            None => {
                let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
                (Arc::new(ServiceRegistry::new(store.clone())), store)
            }
        };

        let producers = config
            .services
            .iter()
            .map(|svc| {
                Arc::new(JobProducer::new(
                    svc.service_type.clone(),
                    config.host_url.clone(),
                    store.clone(),
                    CommandExecutor::new(svc.executor.clone()),
                    config.producer.clone(),
                ))
            })
            .collect();

        Ok(Self {
            config,
            registry,
            store,
            producers,
        })
    }

    /// A dispatch client sharing this node's registry.
    pub fn dispatch_client(&self, transport: Arc<dyn Transport>) -> DispatchClient {
        DispatchClient::new(
            self.registry.clone(),
            transport,
            self.config.dispatch.clone(),
        )
    }

    /// Register every hosted service as a job producer on this node's host.
    pub async fn announce(&self) -> Result<()> {
        for svc in &self.config.services {
            self.registry
                .register(&svc.service_type, &self.config.host_url, &svc.path(), true)
                .await?;
        }
        Ok(())
    }

    /// Remove this node's registrations. Failures are logged, not returned.
    pub async fn withdraw(&self) {
        for svc in &self.config.services {
            if let Err(e) = self
                .registry
                .unregister(&svc.service_type, &self.config.host_url, &svc.path())
                .await
            {
                tracing::warn!(
                    service_type = %svc.service_type,
                    error = %e,
                    "Failed to unregister service"
                );
            }
        }
    }

    /// Router serving this node's producers and, when local, its registry.
    pub fn router(&self) -> axum::Router {
        let services = self
            .producers
            .iter()
            .map(|p| p.clone() as Arc<dyn JobService>);
        let registry = self.config.hosts_registry().then(|| RegistryState {
            registry: self.registry.clone(),
            store: self.store.clone(),
        });
        api::router(WorkerState::new(services), registry)
    }

    /// Run the node until `shutdown` is cancelled.
    ///
    /// 1. Starts the HTTP server
    /// 2. Announces hosted services to the registry
    /// 3. On shutdown, withdraws the registrations so no new work arrives,
    ///    drains the producers, then stops the server
    pub async fn run(
        self,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = tokio::net::TcpListener::bind(self.config.listen_addr).await?;
        let server_token = CancellationToken::new();
        let server = tokio::spawn(api::serve(listener, self.router(), server_token.clone()));

        if let Err(e) = self.announce().await {
            tracing::error!(error = %e, "Failed to announce services, stopping");
            server_token.cancel();
            server.await??;
            return Err(e.into());
        }
        tracing::info!(
            host = %self.config.host_url,
            services = self.config.services.len(),
            hosts_registry = self.config.hosts_registry(),
            "Node started"
        );

        shutdown.cancelled().await;

        self.withdraw().await;
        for producer in &self.producers {
            producer.drain().await;
        }
        server_token.cancel();
        server.await??;

        tracing::info!("Node stopped");
        Ok(())
    }
}
