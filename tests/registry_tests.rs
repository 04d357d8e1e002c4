use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use dispatch_lite::error::DispatchError;
use dispatch_lite::scheduler::stats;
use dispatch_lite::scheduler::{
    InMemoryJobStore, Job, JobStatus, JobStore, Registry, ServiceRegistration, ServiceRegistry,
};

const H1: &str = "http://h1:8080";
const H2: &str = "http://h2:8080";
const H3: &str = "http://h3:8080";
const PATH: &str = "/services/encode";

fn setup() -> (Arc<InMemoryJobStore>, ServiceRegistry) {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = ServiceRegistry::new(store.clone() as Arc<dyn JobStore>);
    (store, registry)
}

/// Insert a job of `service_type` on `host` already in `status`.
async fn add_job(store: &InMemoryJobStore, service_type: &str, host: &str, status: JobStatus) {
    let mut job = Job::new(service_type);
    job.assigned_host = Some(host.to_string());
    job.status = status;
    assert!(store.insert(job).await);
}

async fn register_all(registry: &ServiceRegistry, hosts: &[&str]) {
    for host in hosts {
        registry.register("encode", host, PATH, true).await.unwrap();
    }
}

#[tokio::test]
async fn test_register_defaults() {
    let (_store, registry) = setup();
    let registration = registry.register("encode", H1, PATH, true).await.unwrap();

    assert!(registration.online);
    assert!(!registration.maintenance);
    assert!(registration.job_producer);
    assert!(registration.accepts_jobs());
    assert_eq!(registration.endpoint(), "http://h1:8080/services/encode");
}

#[tokio::test]
async fn test_register_is_upsert() {
    let (_store, registry) = setup();
    registry.register("encode", H1, PATH, false).await.unwrap();
    registry.set_maintenance("encode", H1, true).await.unwrap();
    registry.set_online("encode", H1, false).await.unwrap();

    let again = registry.register("encode", H1, PATH, true).await.unwrap();

    assert!(again.job_producer);
    assert!(again.online);
    // Maintenance survives re-registration
    assert!(again.maintenance);
    assert_eq!(registry.registrations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_host_may_serve_many_types() {
    let (_store, registry) = setup();
    registry.register("encode", H1, PATH, true).await.unwrap();
    registry
        .register("inspect", H1, "/services/inspect", true)
        .await
        .unwrap();

    assert_eq!(registry.registrations().await.unwrap().len(), 2);
    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), vec![H1]);
    assert_eq!(registry.ranked_hosts("inspect").await.unwrap(), vec![H1]);
    assert!(registry.ranked_hosts("analyze").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unregister() {
    let (_store, registry) = setup();
    register_all(&registry, &[H1, H2]).await;

    registry.unregister("encode", H1, PATH).await.unwrap();
    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), vec![H2]);

    // Unknown keys are ignored
    registry.unregister("encode", H1, PATH).await.unwrap();
    registry.unregister("analyze", H3, PATH).await.unwrap();
    assert_eq!(registry.registrations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ranking_excludes_unavailable_registrations() {
    let (_store, registry) = setup();
    register_all(&registry, &[H1, H2]).await;
    registry.register("encode", H3, PATH, false).await.unwrap();

    registry.set_maintenance("encode", H1, true).await.unwrap();
    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), vec![H2]);

    registry.set_online("encode", H2, false).await.unwrap();
    assert!(registry.ranked_hosts("encode").await.unwrap().is_empty());

    registry.set_maintenance("encode", H1, false).await.unwrap();
    registry.set_online("encode", H2, true).await.unwrap();
    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), vec![H1, H2]);
}

#[tokio::test]
async fn test_toggle_applies_to_every_path() {
    let (_store, registry) = setup();
    registry.register("encode", H1, "/a", true).await.unwrap();
    registry.register("encode", H1, "/b", true).await.unwrap();

    registry.set_maintenance("encode", H1, true).await.unwrap();

    let registrations = registry.registrations().await.unwrap();
    assert!(registrations.iter().all(|r| r.maintenance));
}

#[tokio::test]
async fn test_toggle_unknown_registration() {
    let (_store, registry) = setup();
    registry.register("encode", H1, PATH, true).await.unwrap();

    match registry.set_maintenance("encode", H2, true).await {
        Err(DispatchError::RegistrationNotFound { service_type, host }) => {
            assert_eq!(service_type, "encode");
            assert_eq!(host, H2);
        }
        other => panic!("expected RegistrationNotFound, got {:?}", other),
    }
    assert!(matches!(
        registry.set_online("inspect", H1, false).await,
        Err(DispatchError::RegistrationNotFound { .. })
    ));
}

#[tokio::test]
async fn test_registrations_by_type_and_host() {
    let (_store, registry) = setup();
    register_all(&registry, &[H1, H2]).await;
    registry
        .register("inspect", H1, "/services/inspect", true)
        .await
        .unwrap();
    // Unavailable registrations are still listed
    registry.set_online("encode", H2, false).await.unwrap();

    let by_type: Vec<String> = registry
        .registrations_by_type("encode")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.host)
        .collect();
    assert_eq!(by_type, vec![H1, H2]);

    let by_host: Vec<String> = registry
        .registrations_by_host(H1)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.service_type)
        .collect();
    assert_eq!(by_host, vec!["encode", "inspect"]);

    assert!(registry.registrations_by_type("analyze").await.unwrap().is_empty());
    assert!(registry.registrations_by_host(H3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registration_lookup() {
    let (_store, registry) = setup();
    registry.register("encode", H1, "/b", true).await.unwrap();
    registry.register("encode", H1, "/a", false).await.unwrap();
    registry.set_maintenance("encode", H1, true).await.unwrap();

    let found = registry.registration("encode", H1).await.unwrap();
    assert_eq!(found.path, "/a");
    assert!(found.maintenance);
    assert!(!found.job_producer);

    match registry.registration("encode", H2).await {
        Err(DispatchError::RegistrationNotFound { service_type, host }) => {
            assert_eq!(service_type, "encode");
            assert_eq!(host, H2);
        }
        other => panic!("expected RegistrationNotFound, got {:?}", other),
    }
    assert!(matches!(
        registry.registration("inspect", H1).await,
        Err(DispatchError::RegistrationNotFound { .. })
    ));
}

#[tokio::test]
async fn test_create_job_started() {
    let (store, registry) = setup();
    register_all(&registry, &[H1]).await;

    let job = registry.create_job("encode", H1, true).await.unwrap();

    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.assigned_host.as_deref(), Some(H1));
    assert!(job.started_at.is_some());
    assert_eq!(store.get(job.id).await.unwrap(), job);
}

#[tokio::test]
async fn test_create_job_queued() {
    let (store, registry) = setup();
    register_all(&registry, &[H1]).await;
    registry.set_maintenance("encode", H1, true).await.unwrap();

    // Registered hosts track their own jobs regardless of availability
    let job = registry.create_job("encode", H1, false).await.unwrap();

    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.started_at.is_none());
    assert_eq!(
        store
            .count_by_type_and_status("encode", H1, &[JobStatus::Queued])
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn test_create_job_requires_registration() {
    let (store, registry) = setup();
    register_all(&registry, &[H1]).await;

    assert!(matches!(
        registry.create_job("encode", H2, true).await,
        Err(DispatchError::RegistrationNotFound { .. })
    ));
    assert!(matches!(
        registry.create_job("inspect", H1, true).await,
        Err(DispatchError::RegistrationNotFound { .. })
    ));
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn test_created_jobs_count_toward_load() {
    let (_store, registry) = setup();
    register_all(&registry, &[H1, H2]).await;
    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), vec![H1, H2]);

    registry.create_job("encode", H1, true).await.unwrap();

    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), vec![H2, H1]);
}

#[tokio::test]
async fn test_ranking_scenario() {
    let (store, registry) = setup();
    register_all(&registry, &[H1, H2, H3]).await;

    add_job(&store, "encode", H1, JobStatus::Running).await;
    add_job(&store, "encode", H1, JobStatus::Queued).await;
    add_job(&store, "encode", H2, JobStatus::Running).await;
    add_job(&store, "encode", H2, JobStatus::Finished).await;

    assert_eq!(
        registry.ranked_hosts("encode").await.unwrap(),
        vec![H3, H2, H1]
    );

    add_job(&store, "encode", H3, JobStatus::Running).await;
    add_job(&store, "encode", H3, JobStatus::Running).await;
    add_job(&store, "encode", H3, JobStatus::Queued).await;

    assert_eq!(
        registry.ranked_hosts("encode").await.unwrap(),
        vec![H2, H1, H3]
    );
}

#[tokio::test]
async fn test_terminal_jobs_do_not_affect_ranking() {
    let (store, registry) = setup();
    register_all(&registry, &[H1, H2]).await;
    add_job(&store, "encode", H2, JobStatus::Queued).await;

    let before = registry.ranked_hosts("encode").await.unwrap();
    for _ in 0..5 {
        add_job(&store, "encode", H1, JobStatus::Finished).await;
        add_job(&store, "encode", H1, JobStatus::Failed).await;
    }
    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), before);
    assert_eq!(before, vec![H1, H2]);
}

#[tokio::test]
async fn test_active_job_only_moves_host_later() {
    let (store, registry) = setup();
    register_all(&registry, &[H1, H2, H3]).await;

    let mut previous = 0;
    for _ in 0..3 {
        add_job(&store, "encode", H1, JobStatus::Queued).await;
        let ranked = registry.ranked_hosts("encode").await.unwrap();
        let position = ranked.iter().position(|h| h == H1).unwrap();
        assert!(position >= previous);
        previous = position;
    }
    assert_eq!(previous, 2);
}

#[tokio::test]
async fn test_load_counts_only_matching_service_type() {
    let (store, registry) = setup();
    register_all(&registry, &[H1, H2]).await;

    // Busy with other work, idle for encode
    add_job(&store, "inspect", H1, JobStatus::Running).await;
    add_job(&store, "inspect", H1, JobStatus::Running).await;
    add_job(&store, "encode", H2, JobStatus::Running).await;

    assert_eq!(registry.ranked_hosts("encode").await.unwrap(), vec![H1, H2]);
}

#[tokio::test]
async fn test_tie_break_by_host_then_path() {
    let (_store, registry) = setup();
    registry.register("encode", H2, "/b", true).await.unwrap();
    registry.register("encode", H1, "/z", true).await.unwrap();
    registry.register("encode", H2, "/a", true).await.unwrap();

    let ranked: Vec<(String, String)> = registry
        .ranked_registrations("encode")
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.host, r.path))
        .collect();

    assert_eq!(
        ranked,
        vec![
            (H1.to_string(), "/z".to_string()),
            (H2.to_string(), "/a".to_string()),
            (H2.to_string(), "/b".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_statistics_without_jobs() {
    let (_store, registry) = setup();
    register_all(&registry, &[H1]).await;

    let stats = registry.statistics(None).await.unwrap();
    assert_eq!(stats.len(), 1);
    let s = &stats[0];
    assert_eq!(s.registration.host, H1);
    assert_eq!(s.active_jobs(), 0);
    assert_eq!(s.finished_jobs + s.failed_jobs, 0);
    assert_eq!(s.mean_queue_time_ms, 0);
    assert_eq!(s.mean_run_time_ms, 0);
}

#[tokio::test]
async fn test_statistics_counts_and_means() {
    let (store, registry) = setup();
    register_all(&registry, &[H1]).await;

    let base = Utc::now();
    for (queue_ms, run_ms, status) in [
        (100, 1000, JobStatus::Finished),
        (300, 3000, JobStatus::Failed),
    ] {
        let mut job = Job::with_id(Uuid::new_v4(), "encode", base);
        job.assigned_host = Some(H1.to_string());
        job.status = status;
        job.started_at = Some(base + Duration::milliseconds(queue_ms));
        job.completed_at = Some(base + Duration::milliseconds(queue_ms + run_ms));
        assert!(store.insert(job).await);
    }
    add_job(&store, "encode", H1, JobStatus::Running).await;
    add_job(&store, "encode", H1, JobStatus::Queued).await;
    add_job(&store, "encode", H1, JobStatus::Queued).await;

    let stats = registry.statistics(Some("encode")).await.unwrap();
    assert_eq!(stats.len(), 1);
    let s = &stats[0];
    assert_eq!(s.running_jobs, 1);
    assert_eq!(s.queued_jobs, 2);
    assert_eq!(s.finished_jobs, 1);
    assert_eq!(s.failed_jobs, 1);
    assert_eq!(s.mean_queue_time_ms, 200);
    assert_eq!(s.mean_run_time_ms, 2000);
}

#[tokio::test]
async fn test_statistics_filter_and_order() {
    let (_store, registry) = setup();
    registry.register("inspect", H2, "/i", true).await.unwrap();
    registry.register("encode", H2, PATH, true).await.unwrap();
    registry.register("encode", H1, PATH, false).await.unwrap();
    registry.set_maintenance("encode", H2, true).await.unwrap();

    // Every registration is reported, whatever its state
    let all = registry.statistics(None).await.unwrap();
    let keys: Vec<(&str, &str)> = all
        .iter()
        .map(|s| (s.registration.service_type.as_str(), s.registration.host.as_str()))
        .collect();
    assert_eq!(keys, vec![("encode", H1), ("encode", H2), ("inspect", H2)]);

    let inspect = registry.statistics(Some("inspect")).await.unwrap();
    assert_eq!(inspect.len(), 1);
    assert!(registry
        .statistics(Some("analyze"))
        .await
        .unwrap()
        .is_empty());
}

#[test]
fn test_compute_ignores_foreign_jobs() {
    let registration = ServiceRegistration::new("encode", H1, PATH, true);

    let mut foreign_host = Job::new("encode");
    foreign_host.assigned_host = Some(H2.to_string());
    let mut foreign_type = Job::new("inspect");
    foreign_type.assigned_host = Some(H1.to_string());
    let unassigned = Job::new("encode");

    let s = stats::compute(&registration, &[foreign_host, foreign_type, unassigned]);
    assert_eq!(s, dispatch_lite::scheduler::ServiceStatistics::empty(registration));
}

#[test]
fn test_compute_clamps_negative_spans() {
    let registration = ServiceRegistration::new("encode", H1, PATH, true);
    let base = Utc::now();

    let mut skewed = Job::with_id(Uuid::new_v4(), "encode", base);
    skewed.assigned_host = Some(H1.to_string());
    skewed.status = JobStatus::Finished;
    skewed.started_at = Some(base - Duration::milliseconds(500));
    skewed.completed_at = Some(base + Duration::milliseconds(500));

    let s = stats::compute(&registration, &[skewed]);
    assert_eq!(s.finished_jobs, 1);
    assert_eq!(s.mean_queue_time_ms, 0);
    assert_eq!(s.mean_run_time_ms, 1000);
}
