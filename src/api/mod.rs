//! HTTP surface of a node.
//!
//! - worker routes: submit and poll endpoints for each hosted service type
//! - registry routes: registration management, ranking and statistics
//! - store routes: the job store, for workers whose store lives on this node

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::scheduler::{Job, JobStatus, JobStore, Registry, ServiceRegistration, ServiceStatistics};
use crate::worker::JobService;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Wraps [`DispatchError`] so handlers can use `?`.
#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub service_type: String,
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub job_producer: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub service_type: String,
    pub host: String,
    pub path: String,
}

/// Body of the maintenance and online toggles.
#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub service_type: String,
    pub host: String,
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub service_type: String,
}

/// Body of `POST /registry/jobs`: a job tracked on the given host.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLocalJobRequest {
    pub service_type: String,
    pub host: String,
    #[serde(default)]
    pub start: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Default, Deserialize)]
struct StatisticsQuery {
    service_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistrationsQuery {
    service_type: Option<String>,
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationQuery {
    service_type: String,
    host: String,
}

#[derive(Debug, Default, Deserialize)]
struct JobsQuery {
    service_type: Option<String>,
    host: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    service_type: String,
    /// Count across all hosts when absent
    host: Option<String>,
    /// Comma-separated statuses, e.g. `queued,running`
    status: String,
}

// =============================================================================
// Worker routes
// =============================================================================

#[derive(Clone)]
pub struct WorkerState {
    services: Arc<HashMap<String, Arc<dyn JobService>>>,
}

impl WorkerState {
    pub fn new(services: impl IntoIterator<Item = Arc<dyn JobService>>) -> Self {
        let services = services
            .into_iter()
            .map(|s| (s.service_type().to_string(), s))
            .collect();
        Self {
            services: Arc::new(services),
        }
    }

    fn service(&self, service_type: &str) -> ApiResult<&Arc<dyn JobService>> {
        self.services.get(service_type).ok_or_else(|| {
            ApiError(DispatchError::NoWorkersAvailable(service_type.to_string()))
        })
    }
}

/// Submit and poll endpoints for every service hosted on this node.
pub fn worker_routes(state: WorkerState) -> Router {
    Router::new()
        .route("/services/{service_type}/jobs", post(submit_job_handler))
        .route("/services/{service_type}/jobs/{id}", get(poll_job_handler))
        .with_state(state)
}

async fn submit_job_handler(
    State(state): State<WorkerState>,
    Path(service_type): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Job>> {
    let service = state.service(&service_type)?;
    Ok(Json(service.submit_raw(&body).await?))
}

async fn poll_job_handler(
    State(state): State<WorkerState>,
    Path((service_type, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Job>> {
    let service = state.service(&service_type)?;
    Ok(Json(service.get(id).await?))
}

// =============================================================================
// Registry and store routes
// =============================================================================

#[derive(Clone)]
pub struct RegistryState {
    pub registry: Arc<dyn Registry>,
    pub store: Arc<dyn JobStore>,
}

/// Registry management plus the job store backing it.
pub fn registry_routes(state: RegistryState) -> Router {
    Router::new()
        .route("/registry/register", post(register_handler))
        .route("/registry/unregister", post(unregister_handler))
        .route("/registry/maintenance", post(maintenance_handler))
        .route("/registry/online", post(online_handler))
        .route("/registry/registrations", get(registrations_handler))
        .route("/registry/registration", get(registration_handler))
        .route("/registry/jobs", post(create_local_job_handler))
        .route("/registry/hosts/{service_type}", get(ranked_hosts_handler))
        .route("/registry/statistics", get(statistics_handler))
        .route("/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/jobs/count", get(count_jobs_handler))
        .route("/jobs/{id}", get(get_job_handler).put(update_job_handler))
        .with_state(state)
}

async fn register_handler(
    State(state): State<RegistryState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Json<ServiceRegistration>> {
    let registration = state
        .registry
        .register(&req.service_type, &req.host, &req.path, req.job_producer)
        .await?;
    Ok(Json(registration))
}

async fn unregister_handler(
    State(state): State<RegistryState>,
    Json(req): Json<UnregisterRequest>,
) -> ApiResult<StatusCode> {
    state
        .registry
        .unregister(&req.service_type, &req.host, &req.path)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn maintenance_handler(
    State(state): State<RegistryState>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<StatusCode> {
    state
        .registry
        .set_maintenance(&req.service_type, &req.host, req.enabled)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn online_handler(
    State(state): State<RegistryState>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<StatusCode> {
    state
        .registry
        .set_online(&req.service_type, &req.host, req.enabled)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn registrations_handler(
    State(state): State<RegistryState>,
    Query(query): Query<RegistrationsQuery>,
) -> ApiResult<Json<Vec<ServiceRegistration>>> {
    let registrations = match (query.service_type, query.host) {
        (Some(service_type), None) => state.registry.registrations_by_type(&service_type).await?,
        (None, Some(host)) => state.registry.registrations_by_host(&host).await?,
        (Some(service_type), Some(host)) => state
            .registry
            .registrations_by_type(&service_type)
            .await?
            .into_iter()
            .filter(|r| r.host == host)
            .collect(),
        (None, None) => state.registry.registrations().await?,
    };
    Ok(Json(registrations))
}

async fn registration_handler(
    State(state): State<RegistryState>,
    Query(query): Query<RegistrationQuery>,
) -> ApiResult<Json<ServiceRegistration>> {
    Ok(Json(
        state
            .registry
            .registration(&query.service_type, &query.host)
            .await?,
    ))
}

async fn create_local_job_handler(
    State(state): State<RegistryState>,
    Json(req): Json<CreateLocalJobRequest>,
) -> ApiResult<Json<Job>> {
    Ok(Json(
        state
            .registry
            .create_job(&req.service_type, &req.host, req.start)
            .await?,
    ))
}

async fn ranked_hosts_handler(
    State(state): State<RegistryState>,
    Path(service_type): Path<String>,
) -> ApiResult<Json<Vec<ServiceRegistration>>> {
    Ok(Json(
        state.registry.ranked_registrations(&service_type).await?,
    ))
}

async fn statistics_handler(
    State(state): State<RegistryState>,
    Query(query): Query<StatisticsQuery>,
) -> ApiResult<Json<Vec<ServiceStatistics>>> {
    Ok(Json(
        state
            .registry
            .statistics(query.service_type.as_deref())
            .await?,
    ))
}

async fn create_job_handler(
    State(state): State<RegistryState>,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.store.create(&req.service_type).await?))
}

async fn list_jobs_handler(
    State(state): State<RegistryState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let jobs = match (query.service_type, query.host) {
        (Some(service_type), Some(host)) => state.store.jobs_for(&service_type, &host).await?,
        (service_type, host) => state
            .store
            .jobs()
            .await?
            .into_iter()
            .filter(|j| service_type.as_ref().map_or(true, |t| &j.service_type == t))
            .filter(|j| host.is_none() || j.assigned_host == host)
            .collect(),
    };
    Ok(Json(jobs))
}

async fn count_jobs_handler(
    State(state): State<RegistryState>,
    Query(query): Query<CountQuery>,
) -> ApiResult<Json<CountResponse>> {
    let statuses = parse_statuses(&query.status)?;
    let count = match query.host {
        Some(host) => {
            state
                .store
                .count_by_type_and_status(&query.service_type, &host, &statuses)
                .await?
        }
        None => {
            state
                .store
                .count_by_type(&query.service_type, &statuses)
                .await?
        }
    };
    Ok(Json(CountResponse { count }))
}

async fn get_job_handler(
    State(state): State<RegistryState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.store.get(id).await?))
}

async fn update_job_handler(
    State(state): State<RegistryState>,
    Path(id): Path<Uuid>,
    Json(job): Json<Job>,
) -> ApiResult<Json<Job>> {
    if job.id != id {
        return Err(ApiError(DispatchError::InvalidPayload(format!(
            "job id {} does not match path id {}",
            job.id, id
        ))));
    }
    Ok(Json(state.store.update(&job).await?))
}

fn parse_statuses(raw: &str) -> ApiResult<Vec<JobStatus>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<JobStatus>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ApiError(DispatchError::InvalidPayload(e)))
}

// =============================================================================
// Server
// =============================================================================

/// Full application router for a node.
pub fn router(worker: WorkerState, registry: Option<RegistryState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = worker_routes(worker);
    if let Some(registry) = registry {
        app = app.merge(registry_routes(registry));
    }
    app.layer(TraceLayer::new_for_http()).layer(cors)
}

/// Serve `app` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting HTTP server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
