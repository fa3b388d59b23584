use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::Value;
use tracing::info;
use utoipa::OpenApi;

use super::dto::{
    manual_reading, CollectionReport, CreateSystemRequest, HistoryParams, ManualReadingRequest,
    PolicyQuery, RunCollectionRequest, SummariesQuery,
};
use crate::{
    collection::{
        CollectionResult, CollectionService, CollectionSettings, FailureKind, Outcome,
    },
    db::models::{NewSystem, ReadingOrigin, SensorReading, System, SystemPatch},
    error::{Error, Result},
    source::SensorSource,
    status::{Status, StatusPolicy},
    store::{ReadingStore, SystemStore},
    systems::{HistoryTarget, SummaryBuilder, SystemService, SystemSummary},
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub systems: SystemService,
    pub summaries: SummaryBuilder,
    pub collector: CollectionService,
    pub readings: Arc<dyn ReadingStore>,
}

impl AppState {
    /// Wire the services over one pair of stores and a sensor source.
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        systems: Arc<dyn SystemStore>,
        source: Arc<dyn SensorSource>,
        settings: CollectionSettings,
    ) -> Self {
        Self {
            systems: SystemService::new(systems.clone()),
            summaries: SummaryBuilder::new(systems.clone(), readings.clone()),
            collector: CollectionService::new(source, readings.clone(), systems, settings),
            readings,
        }
    }
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Summaries of every system a user owns, most recently registered first.
#[utoipa::path(
    get,
    path = "/systems/summaries",
    params(SummariesQuery),
    responses(
        (status = 200, description = "System summaries", body = Vec<SystemSummary>),
        (status = 400, description = "Missing or invalid query parameters"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "systems"
)]
pub async fn list_summaries(
    State(state): State<AppState>,
    query: Result<Query<SummariesQuery>, QueryRejection>,
) -> Result<Json<Vec<SystemSummary>>> {
    let Query(params) = query?;
    let user_id = params
        .user_id
        .ok_or_else(|| Error::validation("missing required query parameter 'user_id'"))?;
    let summaries = state
        .summaries
        .build_summaries(user_id, params.policy.unwrap_or_default(), Utc::now())
        .await?;
    Ok(Json(summaries))
}

/// Register a new monitoring system for a device.
#[utoipa::path(
    post,
    path = "/systems",
    request_body = CreateSystemRequest,
    responses(
        (status = 201, description = "System registered", body = System),
        (status = 400, description = "Missing or invalid fields"),
        (status = 409, description = "Device already registered"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "systems"
)]
pub async fn create_system(
    State(state): State<AppState>,
    body: Result<Json<CreateSystemRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<System>)> {
    let Json(req) = body?;
    let system = state.systems.register(NewSystem::try_from(req)?).await?;
    Ok((StatusCode::CREATED, Json(system)))
}

/// One system with its latest reading and derived status.
#[utoipa::path(
    get,
    path = "/systems/{id}",
    params(
        ("id" = i64, Path, description = "System ID"),
        PolicyQuery,
    ),
    responses(
        (status = 200, description = "System summary", body = SystemSummary),
        (status = 404, description = "System not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "systems"
)]
pub async fn get_system(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<PolicyQuery>, QueryRejection>,
) -> Result<Json<SystemSummary>> {
    let Query(params) = query?;
    let summary = state
        .summaries
        .build_summary(id, params.policy.unwrap_or_default(), Utc::now())
        .await?;
    Ok(Json(summary))
}

/// Change a system's metadata. Absent fields keep their current value.
#[utoipa::path(
    patch,
    path = "/systems/{id}",
    params(("id" = i64, Path, description = "System ID")),
    request_body = SystemPatch,
    responses(
        (status = 200, description = "Updated system", body = System),
        (status = 400, description = "Invalid fields"),
        (status = 404, description = "System not found"),
        (status = 409, description = "Device already registered"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "systems"
)]
pub async fn update_system(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<SystemPatch>, JsonRejection>,
) -> Result<Json<System>> {
    let Json(patch) = body?;
    Ok(Json(state.systems.update(id, patch).await?))
}

/// Remove a system. The device's readings are kept.
#[utoipa::path(
    delete,
    path = "/systems/{id}",
    params(("id" = i64, Path, description = "System ID")),
    responses(
        (status = 204, description = "System deleted"),
        (status = 404, description = "System not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "systems"
)]
pub async fn delete_system(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    state.systems.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Recent readings of the device a system is bound to, newest first.
#[utoipa::path(
    get,
    path = "/systems/{id}/history",
    params(
        ("id" = i64, Path, description = "System ID"),
        HistoryParams,
    ),
    responses(
        (status = 200, description = "Readings, newest first", body = Vec<SensorReading>),
        (status = 400, description = "Invalid window or limit"),
        (status = 404, description = "System not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "systems"
)]
pub async fn system_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<SensorReading>>> {
    let Query(params) = query?;
    let rows = state
        .summaries
        .history(HistoryTarget::System(id), params.window()?, params.limit(), Utc::now())
        .await?;
    Ok(Json(rows))
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// Latest reading of a device, or `null` if it has never reported.
#[utoipa::path(
    get,
    path = "/devices/{device_id}/latest",
    params(("device_id" = String, Path, description = "Device ID")),
    responses(
        (status = 200, description = "Latest reading or null", body = Option<SensorReading>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "devices"
)]
pub async fn device_latest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Option<SensorReading>>> {
    Ok(Json(state.readings.latest(&device_id).await?))
}

/// Recent readings of a device, newest first. Works for unregistered devices.
#[utoipa::path(
    get,
    path = "/devices/{device_id}/history",
    params(
        ("device_id" = String, Path, description = "Device ID"),
        HistoryParams,
    ),
    responses(
        (status = 200, description = "Readings, newest first", body = Vec<SensorReading>),
        (status = 400, description = "Invalid window or limit"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "devices"
)]
pub async fn device_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<SensorReading>>> {
    let Query(params) = query?;
    let rows = state
        .summaries
        .history(HistoryTarget::Device(device_id), params.window()?, params.limit(), Utc::now())
        .await?;
    Ok(Json(rows))
}

// ---------------------------------------------------------------------------
// Collection and manual readings
// ---------------------------------------------------------------------------

/// Run one collection sweep now and report every device's outcome.
/// The body is optional; an empty body sweeps every registered system,
/// `user_id` narrows it to one user and `device_id` to a single device.
#[utoipa::path(
    post,
    path = "/collection/run",
    request_body(content = RunCollectionRequest, description = "Optional sweep scope"),
    responses(
        (status = 200, description = "Sweep report", body = CollectionReport),
        (status = 400, description = "Malformed body or conflicting scope"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "collection"
)]
pub async fn run_collection(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CollectionReport>> {
    let req: RunCollectionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunCollectionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| Error::validation(e.to_string()))?
    };
    let sweep = state.collector.sweep(req.scope()?).await?;
    Ok(Json(sweep.into()))
}

/// Store a reading submitted by hand instead of pulled from the device.
#[utoipa::path(
    post,
    path = "/readings/manual",
    request_body = ManualReadingRequest,
    responses(
        (status = 201, description = "Reading stored", body = SensorReading),
        (status = 400, description = "Missing or non-numeric fields"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn submit_manual_reading(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<SensorReading>)> {
    let Json(body) = body?;
    let new = manual_reading(&body, Utc::now())?;
    let owner = state.systems.find_by_device(&new.device_id).await?;
    let reading = state.readings.append(new).await?;
    match owner {
        Some(system) => info!(
            device_id = %reading.device_id,
            system_id = system.id,
            reading_id = reading.id,
            "Manual reading stored"
        ),
        None => info!(
            device_id = %reading.device_id,
            reading_id = reading.id,
            "Manual reading stored for unregistered device"
        ),
    }
    Ok((StatusCode::CREATED, Json(reading)))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "health"
)]
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_summaries,
        create_system,
        get_system,
        update_system,
        delete_system,
        system_history,
        device_latest,
        device_history,
        run_collection,
        submit_manual_reading,
        health,
    ),
    components(schemas(
        System,
        SystemPatch,
        SystemSummary,
        SensorReading,
        ReadingOrigin,
        Status,
        StatusPolicy,
        CreateSystemRequest,
        ManualReadingRequest,
        RunCollectionRequest,
        CollectionReport,
        CollectionResult,
        Outcome,
        FailureKind,
    )),
    tags(
        (name = "systems", description = "System registration and summaries"),
        (name = "devices", description = "Per-device readings"),
        (name = "collection", description = "On-demand collection sweeps"),
        (name = "readings", description = "Manual reading submission"),
        (name = "health", description = "Liveness"),
    ),
    info(
        title = "Agri Monitor API",
        version = "0.1.0",
        description = "REST API for agricultural sensor monitoring"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
