//! HTTP routes for eegscope.
//!
//! Every `/zcc/*` route resolves the caller's session from the bearer token
//! (the token string is the identity). Absent state answers 404, data that is
//! still being computed answers 409, both with a `{"fail": ...}` body.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::collection::{CollectRequest, EpochCollection, TfrRequest};
use crate::error::PipelineError;
use crate::failures::FailureLog;
use crate::index::DataIndex;
use crate::registry::SessionRegistry;
use crate::session::UserSession;
use crate::views;

/// Shared state for route handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub index: Arc<DataIndex>,
    pub failures: Arc<FailureLog>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/zcc/sessions.json", get(list_sessions))
        .route("/zcc/sessions/evict", post(evict_sessions))
        .route("/zcc/experiments.csv", get(experiments_csv))
        .route("/zcc/data_files.csv", get(data_files_csv))
        .route("/zcc/data_files/rescan", post(rescan_data_files))
        .route("/zcc/eegAnalysis.json", get(eeg_analysis))
        .route("/zcc/collectEpochs.json", post(collect_epochs))
        .route("/zcc/status.json", get(status))
        .route("/zcc/rawInfo.json", get(raw_info))
        .route("/zcc/montage.csv", get(montage_csv))
        .route("/zcc/events.csv", get(events_csv))
        .route("/zcc/evoked.csv", get(evoked_csv))
        .route("/zcc/sensorTrace.csv", get(sensor_trace_csv))
        .route("/zcc/psd.csv", get(psd_csv))
        .route("/zcc/timeFrequency.csv", get(time_frequency_csv))
        .route("/zcc/errors.json", get(recent_failures))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Route-level failure, rendered as `{"fail": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or empty bearer identity")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    NotReady(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Precondition { .. } => ApiError::NotReady(message),
            PipelineError::Format { .. } | PipelineError::NoMatchingTrials(_) => {
                ApiError::NotFound(message)
            }
            PipelineError::Processing(_) => ApiError::BadRequest(message),
            PipelineError::Interrupted => ApiError::Internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "fail": self.to_string() }))).into_response()
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn session(state: &AppState, headers: &HeaderMap) -> Result<Arc<UserSession>, ApiError> {
    let identity = bearer(headers).unwrap_or_default();
    state
        .registry
        .get_session(identity)
        .ok_or(ApiError::Unauthorized)
}

fn loaded(session: &UserSession) -> Result<Arc<EpochCollection>, ApiError> {
    session.data().ok_or_else(|| {
        ApiError::NotFound("no recording loaded, request /zcc/eegAnalysis.json first".to_string())
    })
}

/// Run CPU-bound work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {}", e)))?
}

fn csv(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response()
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.registry.stats();
    Json(json!({
        "status": "healthy",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": stats.total,
        "sessions_with_data": stats.with_data,
    }))
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    session(&state, &headers)?;
    Ok(Json(state.registry.list_sessions()))
}

async fn evict_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    session(&state, &headers)?;
    let evicted = state.registry.evict_idle();
    Ok(Json(json!({ "evicted": evicted, "remaining": state.registry.len() })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentQuery {
    #[serde(default)]
    experiment_name: Option<String>,
}

async fn experiments_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    session(&state, &headers)?;
    let index = Arc::clone(&state.index);
    let body = blocking(move || Ok(views::experiments_csv(index.experiments(), &index.files()))).await?;
    Ok(csv(body))
}

async fn data_files_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExperimentQuery>,
) -> Result<Response, ApiError> {
    session(&state, &headers)?;
    let index = Arc::clone(&state.index);
    let body = blocking(move || {
        let files = index.by_experiment(query.experiment_name.as_deref());
        Ok(views::data_files_csv(&files))
    })
    .await?;
    Ok(csv(body))
}

async fn rescan_data_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    session(&state, &headers)?;
    let index = Arc::clone(&state.index);
    let files = blocking(move || Ok(index.rescan())).await?;
    Ok(Json(json!({ "files": files })))
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisQuery {
    #[serde(default, rename = "experimentName")]
    experiment_name: String,
    #[serde(default, rename = "subjectID")]
    subject_id: String,
}

/// Load the recording of `subjectID` into the caller's session.
///
/// An unknown subject still answers 200, with `fail` next to the echoed
/// parameters.
async fn eeg_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AnalysisQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers)?;
    let mut body = json!({
        "experimentName": query.experiment_name,
        "subjectID": query.subject_id,
    });

    let index = Arc::clone(&state.index);
    let subject_id = query.subject_id.clone();
    let selected = blocking(move || {
        let matches = index.find_subject(&subject_id);
        let Some(selected) = matches.first().cloned() else {
            return Ok(None);
        };
        if matches.len() > 1 {
            tracing::warn!(
                subject = %subject_id,
                matches = matches.len(),
                "subject ID matches several recordings, using the first"
            );
        }
        let data = session.start_with_recording(&selected.path, &selected.subject_id);
        Ok(Some((selected, data.recording().stage())))
    })
    .await?;

    match selected {
        None => {
            tracing::error!(subject = %query.subject_id, "subject ID not found in the data index");
            body["fail"] = json!("Not found subjectID");
        }
        Some((file, stage)) => {
            body["path"] = json!(file.path.to_string_lossy().replace('\\', "/"));
            body["experiment"] = json!(file.experiment);
            body["stage"] = json!(stage);
        }
    }
    Ok(Json(body))
}

async fn collect_epochs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CollectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers)?;
    let job = session.collect_epochs(request).ok_or_else(|| {
        ApiError::NotFound("no loaded recording to collect epochs from".to_string())
    })?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "stamp": job.stamp() }))))
}

async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers)?;
    let data = session.data();
    let epochs = data.as_ref().and_then(|d| d.epochs());
    Ok(Json(json!({
        "identity": session.identity(),
        "subject": session.current_subject(),
        "stage": data.as_ref().map(|d| d.recording().stage()),
        "stamp": data.as_ref().map(|d| d.stamp()),
        "epochsReady": epochs.is_some(),
        "nEpochs": epochs.as_ref().map(|e| e.n_epochs()),
        "request": data.as_ref().and_then(|d| d.request()),
    })))
}

async fn raw_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session = session(&state, &headers)?;
    let data = loaded(&session)?;
    let raw = data
        .recording()
        .raw()
        .ok_or_else(|| ApiError::NotFound("raw signal failed to load".to_string()))?;
    Ok(Json(json!({
        "sfreq": raw.info.sfreq,
        "chNames": raw.info.ch_names,
        "nTimes": raw.n_times(),
        "durationSecs": raw.duration_secs(),
        "measDate": raw.info.meas_date,
        "annotations": raw.annotations.len(),
    })))
}

async fn montage_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session(&state, &headers)?;
    let data = loaded(&session)?;
    let montage = data
        .recording()
        .montage()
        .ok_or_else(|| ApiError::NotFound("no montage attached".to_string()))?;
    Ok(csv(views::montage_csv(montage)))
}

async fn events_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = session(&state, &headers)?;
    let data = loaded(&session)?;
    let table = data
        .recording()
        .events()
        .ok_or_else(|| ApiError::NotFound("no events extracted".to_string()))?;
    Ok(csv(views::events_csv(table)))
}

#[derive(Debug, Deserialize)]
struct EventQuery {
    event: String,
}

async fn evoked_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventQuery>,
) -> Result<Response, ApiError> {
    let session = session(&state, &headers)?;
    let data = loaded(&session)?;
    let body = blocking(move || {
        let evoked = data.average_for(&query.event)?;
        Ok(views::evoked_csv(&evoked))
    })
    .await?;
    Ok(csv(body))
}

#[derive(Debug, Deserialize)]
struct SensorQuery {
    event: String,
    sensor: String,
}

async fn sensor_trace_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SensorQuery>,
) -> Result<Response, ApiError> {
    let session = session(&state, &headers)?;
    let data = loaded(&session)?;
    let body = blocking(move || {
        let (trials, times) = data.sensor_trials(&query.sensor, &query.event)?;
        Ok(views::sensor_trace_csv(&trials, &times))
    })
    .await?;
    Ok(csv(body))
}

#[derive(Debug, Deserialize)]
struct PsdQuery {
    event: String,
    #[serde(default)]
    sensor: Option<String>,
    #[serde(default)]
    fmin: Option<f64>,
    #[serde(default)]
    fmax: Option<f64>,
}

async fn psd_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PsdQuery>,
) -> Result<Response, ApiError> {
    let session = session(&state, &headers)?;
    let data = loaded(&session)?;
    let body = blocking(move || {
        let sensor = query.sensor.as_deref().filter(|s| !s.is_empty());
        let (spectrum, names) = data.compute_psd(
            sensor,
            &query.event,
            query.fmin.unwrap_or(0.0),
            query.fmax.unwrap_or(f64::INFINITY),
        )?;
        Ok(views::psd_csv(&spectrum, &names))
    })
    .await?;
    Ok(csv(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TfrQuery {
    event: String,
    #[serde(default)]
    sensor: Option<String>,
    #[serde(default)]
    fmin: Option<f64>,
    #[serde(default)]
    fmax: Option<f64>,
    #[serde(default)]
    n_freqs: Option<usize>,
    #[serde(default)]
    n_cycles: Option<f64>,
}

async fn time_frequency_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TfrQuery>,
) -> Result<Response, ApiError> {
    let session = session(&state, &headers)?;
    let data = loaded(&session)?;
    let request = TfrRequest {
        fmin: query.fmin.unwrap_or(8.0),
        fmax: query.fmax.unwrap_or(30.0),
        n_freqs: query.n_freqs.unwrap_or(12),
        n_cycles: query.n_cycles.unwrap_or(2.0),
    };
    let body = blocking(move || {
        let sensor = query.sensor.as_deref().filter(|s| !s.is_empty());
        let (tfr, _names) = data.compute_time_frequency(sensor, &query.event, &request)?;
        Ok(views::time_frequency_csv(&tfr))
    })
    .await?;
    Ok(csv(body))
}

async fn recent_failures(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    session(&state, &headers)?;
    Ok(Json(state.failures.recent()))
}
