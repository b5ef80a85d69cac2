use axum::{
    Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use claims_queue::{
    BucketFilter, ClaimsViewModel, CsvDialect, LoadOutcome, QueueView, RowOutcome,
    export_file_name,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::models::{
    AutoRefreshRequest, ExportQuery, QueueQuery, RowActionResponse, StatsResponse,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

pub const CORRELATION_HEADER: &str = "x-correlation-id";

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "claim_id": id
        })),
    )
}

fn conflict_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "error": message,
            "claim_id": id
        })),
    )
}

fn upstream_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub view_model: Arc<ClaimsViewModel>,
}

pub fn create_app(view_model: Arc<ClaimsViewModel>) -> Router {
    build_router(AppState { view_model })
}

fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/queue", get(get_queue))
        .route("/queue/stats", get(get_stats))
        .route("/queue/export", get(export_queue))
        .route("/queue/reload", post(reload_queue))
        .route("/queue/auto-refresh", post(set_auto_refresh))
        .route("/queue/{claim_id}/refresh", post(refresh_claim))
        .route("/queue/{claim_id}/retry", post(retry_claim))
        .route("/queue/{claim_id}/receipt", get(claim_receipt))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Tag every request with a correlation id and run it inside a span carrying it.
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert(CORRELATION_HEADER, value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Claims Queue Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Claims queue with status buckets, search, row refresh/retry and CSV export",
        "endpoints": {
            "GET /queue?bucket=&q=": "Filtered claims with bucket counts",
            "GET /queue/stats": "Bucket counts over the whole queue",
            "GET /queue/export?bucket=&q=&dialect=": "CSV export of the filtered queue",
            "POST /queue/reload": "Reload the queue from the claims API",
            "POST /queue/auto-refresh": "Enable or disable periodic reload",
            "POST /queue/{claim_id}/refresh": "Refresh one claim's live status",
            "POST /queue/{claim_id}/retry": "Resubmit a failed or rejected claim",
            "GET /queue/{claim_id}/receipt": "Receipt location for a claim",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn parse_filter(bucket: Option<&str>) -> Result<BucketFilter, ApiError> {
    bucket
        .unwrap_or("all")
        .parse::<BucketFilter>()
        .map_err(|e| bad_request_error(&e.to_string()))
}

async fn get_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<QueueView> {
    let filter = parse_filter(query.bucket.as_deref())?;
    let search = query.q.unwrap_or_default();
    Ok(Json(state.view_model.view(filter, &search)))
}

async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<StatsResponse> {
    let filter = parse_filter(query.bucket.as_deref())?;
    let search = query.q.unwrap_or_default();
    let view = state.view_model.view(filter, &search);
    Ok(Json(StatsResponse {
        counts: view.counts,
        filtered: view.claims.len(),
    }))
}

async fn export_queue(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let filter = parse_filter(query.bucket.as_deref())?;
    let dialect = query
        .dialect
        .as_deref()
        .unwrap_or("legacy")
        .parse::<CsvDialect>()
        .map_err(|e| bad_request_error(&e.to_string()))?;
    let search = query.q.unwrap_or_default();

    let csv = state.view_model.export_csv(filter, &search, dialect);
    let file_name = export_file_name(chrono::Utc::now().date_naive());
    info!(file_name = %file_name, filter = %filter, "Exporting claims queue");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn reload_queue(State(state): State<AppState>) -> ApiResult<QueueView> {
    match state.view_model.load_claims(false).await {
        LoadOutcome::Applied { count } => {
            info!(count, "Queue reloaded on request");
            Ok(Json(state.view_model.view(BucketFilter::All, "")))
        }
        LoadOutcome::Stale => Ok(Json(state.view_model.view(BucketFilter::All, ""))),
        LoadOutcome::Failed(message) => {
            error!(error = %message, "Queue reload failed");
            Err(upstream_error("Failed to load claims", &message))
        }
    }
}

async fn set_auto_refresh(
    State(state): State<AppState>,
    Json(request): Json<AutoRefreshRequest>,
) -> Json<Value> {
    if request.enabled {
        state.view_model.start_auto_refresh();
    } else {
        state.view_model.stop_auto_refresh();
    }
    Json(json!({
        "auto_refresh": state.view_model.is_auto_refresh_enabled(),
        "interval_secs": state.view_model.config().auto_refresh_interval.as_secs()
    }))
}

async fn refresh_claim(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> ApiResult<RowActionResponse> {
    info!(claim_id = %claim_id, "Refreshing claim status");
    let outcome = state.view_model.refresh_claim(&claim_id).await;
    row_response(&claim_id, "refreshed", outcome)
}

async fn retry_claim(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> ApiResult<RowActionResponse> {
    let claim = state
        .view_model
        .claim(&claim_id)
        .ok_or_else(|| not_found_error("Claim not in queue", &claim_id))?;

    if !claim.is_retryable() {
        warn!(claim_id = %claim_id, status = %claim.status, "Retry refused for non-failed claim");
        return Err(conflict_error(
            "Only failed or rejected claims can be retried",
            &claim_id,
        ));
    }

    info!(claim_id = %claim_id, "Retrying claim");
    let outcome = state.view_model.retry_claim(&claim_id).await;
    row_response(&claim_id, "retried", outcome)
}

fn row_response(claim_id: &str, done: &str, outcome: RowOutcome) -> ApiResult<RowActionResponse> {
    match outcome {
        RowOutcome::Updated(claim) => Ok(Json(RowActionResponse {
            claim_id: claim_id.to_string(),
            outcome: done.to_string(),
            claim: Some(claim),
            message: None,
        })),
        RowOutcome::NotFound => Err(not_found_error("Claim not in queue", claim_id)),
        RowOutcome::Busy(activity) => Err(conflict_error(
            &format!("Claim is busy ({})", activity),
            claim_id,
        )),
        RowOutcome::Stale => Err(conflict_error(
            "Queue was reloaded while the claim status was in flight",
            claim_id,
        )),
        RowOutcome::Failed(message) => Err(upstream_error("Claims API request failed", &message)),
    }
}

async fn claim_receipt(
    State(state): State<AppState>,
    Path(claim_id): Path<String>,
) -> ApiResult<Value> {
    if state.view_model.claim(&claim_id).is_none() {
        return Err(not_found_error("Claim not in queue", &claim_id));
    }
    Ok(Json(json!({
        "claim_id": claim_id,
        "receipt_url": state.view_model.receipt_url(&claim_id)
    })))
}
