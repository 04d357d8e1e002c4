//! End-to-end tests over real HTTP: a coordinator node hosting the registry
//! and job store, and worker nodes reaching it through the remote clients.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dispatch_lite::api::{self, RegistryState, WorkerState};
use dispatch_lite::config::{DispatchConfig, ExecutorConfig, NodeConfig, ProducerConfig};
use dispatch_lite::dispatch::{DispatchClient, HttpTransport};
use dispatch_lite::error::DispatchError;
use dispatch_lite::node::Node;
use dispatch_lite::remote::{RemoteJobStore, RemoteRegistry};
use dispatch_lite::scheduler::{InMemoryJobStore, JobStatus, JobStore, Registry, ServiceRegistry};
use dispatch_lite::worker::{CommandExecutor, CommandPayload, JobProducer, JobService};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Serve `app` on an ephemeral port, returning its base URL.
async fn spawn_server(app: axum::Router, shutdown: CancellationToken) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(api::serve(listener, app, shutdown));
    format!("http://{}", addr)
}

async fn spawn_coordinator(shutdown: CancellationToken) -> String {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(ServiceRegistry::new(store.clone()));
    let app = api::router(
        WorkerState::new(Vec::<Arc<dyn JobService>>::new()),
        Some(RegistryState { registry, store }),
    );
    spawn_server(app, shutdown).await
}

/// A worker whose producer records jobs in the coordinator's store.
async fn spawn_worker(coordinator: &str, shutdown: CancellationToken) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = format!("http://{}", listener.local_addr().unwrap());

    let store: Arc<dyn JobStore> = Arc::new(RemoteJobStore::new(coordinator, TIMEOUT).unwrap());
    let producer: Arc<dyn JobService> = Arc::new(JobProducer::new(
        "echo",
        host.clone(),
        store,
        CommandExecutor::new(ExecutorConfig::new("echo")),
        ProducerConfig::default(),
    ));
    let app = api::router(WorkerState::new([producer]), None);
    tokio::spawn(api::serve(listener, app, shutdown));
    host
}

fn dispatcher(coordinator: &str) -> DispatchClient {
    DispatchClient::new(
        Arc::new(RemoteRegistry::new(coordinator, TIMEOUT).unwrap()),
        Arc::new(HttpTransport::new(TIMEOUT).unwrap()),
        DispatchConfig::default().with_poll_interval_ms(20),
    )
}

#[tokio::test]
async fn test_remote_store_round_trip() {
    let shutdown = CancellationToken::new();
    let coordinator = spawn_coordinator(shutdown.clone()).await;
    let store = RemoteJobStore::new(&coordinator, TIMEOUT).unwrap();

    let mut job = store.create("inspect").await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    job.assigned_host = Some("http://w:1".to_string());
    job.start();
    store.update(&job).await.unwrap();

    assert_eq!(
        store
            .count_by_type_and_status("inspect", "http://w:1", &JobStatus::ACTIVE)
            .await
            .unwrap(),
        1
    );
    assert_eq!(store.jobs_for("inspect", "http://w:1").await.unwrap().len(), 1);
    assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Running);

    let mut stale = job.clone();
    stale.status = JobStatus::Queued;
    assert!(matches!(
        store.update(&stale).await,
        Err(DispatchError::Remote { status: 409, .. })
    ));

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        store.get(missing).await,
        Err(DispatchError::JobNotFound(id)) if id == missing
    ));

    shutdown.cancel();
}

#[tokio::test]
async fn test_remote_registry() {
    let shutdown = CancellationToken::new();
    let coordinator = spawn_coordinator(shutdown.clone()).await;
    let registry = RemoteRegistry::new(&coordinator, TIMEOUT).unwrap();

    registry.register("echo", "http://b:1", "/p", true).await.unwrap();
    registry.register("echo", "http://a:1", "/p", true).await.unwrap();

    assert_eq!(
        registry.ranked_hosts("echo").await.unwrap(),
        vec!["http://a:1", "http://b:1"]
    );

    registry.set_maintenance("echo", "http://a:1", true).await.unwrap();
    assert_eq!(registry.ranked_hosts("echo").await.unwrap(), vec!["http://b:1"]);

    assert!(matches!(
        registry.set_online("echo", "http://c:1", false).await,
        Err(DispatchError::RegistrationNotFound { .. })
    ));

    registry.unregister("echo", "http://b:1", "/p").await.unwrap();
    assert_eq!(registry.registrations().await.unwrap().len(), 1);
    assert_eq!(registry.statistics(Some("echo")).await.unwrap().len(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_remote_registry_lookups_and_local_jobs() {
    let shutdown = CancellationToken::new();
    let coordinator = spawn_coordinator(shutdown.clone()).await;
    let registry = RemoteRegistry::new(&coordinator, TIMEOUT).unwrap();
    let store = RemoteJobStore::new(&coordinator, TIMEOUT).unwrap();

    registry.register("echo", "http://a:1", "/p", true).await.unwrap();
    registry.register("echo", "http://b:1", "/p", true).await.unwrap();
    registry.register("scan", "http://a:1", "/s", false).await.unwrap();

    assert_eq!(registry.registrations_by_type("echo").await.unwrap().len(), 2);
    assert_eq!(registry.registrations_by_host("http://a:1").await.unwrap().len(), 2);
    let scan = registry.registration("scan", "http://a:1").await.unwrap();
    assert_eq!(scan.path, "/s");
    assert!(!scan.job_producer);
    assert!(matches!(
        registry.registration("scan", "http://b:1").await,
        Err(DispatchError::RegistrationNotFound { .. })
    ));

    let job = registry.create_job("echo", "http://a:1", true).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());
    registry.create_job("echo", "http://b:1", false).await.unwrap();
    assert!(matches!(
        registry.create_job("echo", "http://c:1", true).await,
        Err(DispatchError::RegistrationNotFound { .. })
    ));

    assert_eq!(store.count_by_type("echo", &JobStatus::ACTIVE).await.unwrap(), 2);
    assert_eq!(store.count_by_type("echo", &[JobStatus::Running]).await.unwrap(), 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_dispatch_over_http() {
    let shutdown = CancellationToken::new();
    let coordinator = spawn_coordinator(shutdown.clone()).await;
    let worker = spawn_worker(&coordinator, shutdown.clone()).await;

    let registry = RemoteRegistry::new(&coordinator, TIMEOUT).unwrap();
    registry
        .register("echo", &worker, "/services/echo", true)
        .await
        .unwrap();

    let job = dispatcher(&coordinator)
        .dispatch("echo", &CommandPayload::new(["hello"]), true)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Finished);
    assert_eq!(job.payload.as_deref(), Some("hello\n"));
    assert_eq!(job.assigned_host.as_deref(), Some(worker.as_str()));

    let stats = registry.statistics(Some("echo")).await.unwrap();
    assert_eq!(stats[0].finished_jobs, 1);

    shutdown.cancel();
}

#[tokio::test]
async fn test_dispatch_skips_dead_host() {
    let shutdown = CancellationToken::new();
    let coordinator = spawn_coordinator(shutdown.clone()).await;
    let worker = spawn_worker(&coordinator, shutdown.clone()).await;

    // Nothing listens on port 1; "http://127.0.0.1:1" sorts before the live worker
    let registry = RemoteRegistry::new(&coordinator, TIMEOUT).unwrap();
    registry
        .register("echo", "http://127.0.0.1:1", "/services/echo", true)
        .await
        .unwrap();
    registry
        .register("echo", &worker, "/services/echo", true)
        .await
        .unwrap();

    let job = dispatcher(&coordinator)
        .dispatch("echo", &CommandPayload::new(["fallback"]), false)
        .await
        .unwrap();
    assert_eq!(job.assigned_host.as_deref(), Some(worker.as_str()));

    shutdown.cancel();
}

#[tokio::test]
async fn test_node_lifecycle() {
    // Reserve a port for the node
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let host_url = format!("http://{}", addr);
    let config =
        NodeConfig::new(addr, host_url.clone()).with_service("echo", ExecutorConfig::new("echo"));

    let shutdown = CancellationToken::new();
    let node = Node::new(config).unwrap();
    let handle = tokio::spawn(node.run(shutdown.clone()));

    let registry = RemoteRegistry::new(&host_url, TIMEOUT).unwrap();
    let mut announced = false;
    for _ in 0..100 {
        if let Ok(hosts) = registry.ranked_hosts("echo").await {
            if hosts == vec![host_url.clone()] {
                announced = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(announced, "node never announced its service");

    let job = dispatcher(&host_url)
        .dispatch("echo", &CommandPayload::new(["from", "node"]), true)
        .await
        .unwrap();
    assert_eq!(job.payload.as_deref(), Some("from node\n"));

    shutdown.cancel();
    tokio::time::timeout(TIMEOUT, handle)
        .await
        .expect("node did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_node_stops_server_when_announce_fails() {
    let dead_registry = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let config = NodeConfig::new(addr, format!("http://{}", addr))
        .with_service("echo", ExecutorConfig::new("echo"))
        .with_registry(dead_registry);

    let node = Node::new(config).unwrap();
    let result = tokio::time::timeout(TIMEOUT, node.run(CancellationToken::new()))
        .await
        .expect("node kept running after a failed announce");
    assert!(result.is_err());

    // The server has released its listener
    tokio::net::TcpListener::bind(addr).await.unwrap();
}
