//! Admin HTTP surface.
//!
//! A small JSON API over the pipeline: bulk jobs, gap scans, the review
//! queue, schema validation and repair, usage and metrics. Protected by an
//! optional shared API key checked in constant time; without a configured
//! key the surface is open (local development).

use crate::bulk::{BulkProcessor, JobReport};
use crate::config::Config;
use crate::content::{ContentId, ContentStore, ContentType};
use crate::error::RepairError;
use crate::i18n::Language;
use crate::llm::{LlmClient, RateLimitPolicy, UsageLedger, DEFAULT_TIMEOUT};
use crate::metrics::PipelineMetrics;
use crate::resolver::{Origin, Resolver};
use crate::review::ReviewQueue;
use crate::schema;
use crate::security::constant_time_compare;
use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ContentStore>,
    pub resolver: Resolver,
    pub bulk: Arc<BulkProcessor>,
    pub review: ReviewQueue,
    pub ledger: UsageLedger,
    pub llm: LlmClient,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal(err: anyhow::Error) -> ApiError {
    error!("internal error: {:#}", err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/jobs", post(create_job))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/cancel", post(cancel_job))
        .route("/api/gaps", get(list_gaps))
        .route("/api/resolve", get(resolve_field))
        .route("/api/review", get(list_reviews))
        .route("/api/review/:content_id/approve", post(approve_review))
        .route("/api/schema/validate", post(validate_schema))
        .route("/api/schema/fix", post(fix_schema))
        .route("/api/usage", get(usage_report))
        .route("/api/metrics", get(metrics_report))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process is stopped.
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("admin API listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Shared-key check for everything under /api. Comparison is constant time.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = &state.config.api_key {
        let provided = req
            .headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !constant_time_compare(provided, expected) {
            return Err(api_error(StatusCode::UNAUTHORIZED, "invalid API key"));
        }
    }
    Ok(next.run(req).await)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

// ==================== Jobs ====================

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    language: String,
    /// Content type names; defaults to all types when omitted.
    types: Option<Vec<String>>,
    /// Explicit content ids, processed in the given order. Takes precedence
    /// over `types`: no gap scan runs when this is present.
    item_ids: Option<Vec<ContentId>>,
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    job_id: i64,
}

fn parse_types(names: Option<&[String]>) -> Result<Vec<ContentType>, ApiError> {
    match names {
        None => Ok(vec![
            ContentType::Page,
            ContentType::Post,
            ContentType::Location,
            ContentType::Program,
        ]),
        Some(names) => names
            .iter()
            .map(|name| {
                ContentType::from_str(name).ok_or_else(|| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        format!("unknown content type '{}'", name),
                    )
                })
            })
            .collect(),
    }
}

fn parse_language(code: &str) -> Result<Language, ApiError> {
    Language::from_code(code)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{:#}", e)))
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let language = parse_language(&payload.language)?;

    let job_id = match &payload.item_ids {
        Some(item_ids) => state.bulk.start_job_for_items(item_ids, language),
        None => {
            let types = parse_types(payload.types.as_deref())?;
            state.bulk.start_job(&types, language)
        }
    }
    .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("{:#}", e)))?;

    // The job runs in the background; clients poll GET /api/jobs/:id
    let bulk = Arc::clone(&state.bulk);
    tokio::spawn(async move {
        if let Err(e) = bulk.drive(job_id).await {
            error!("bulk job {} aborted: {:#}", job_id, e);
        }
    });

    Ok(Json(CreateJobResponse { job_id }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Result<Json<JobReport>, ApiError> {
    match state.bulk.job_report(job_id).map_err(internal)? {
        Some(report) => Ok(Json(report)),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("job {} not found", job_id),
        )),
    }
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.bulk.cancel_job(job_id).map_err(internal)?;
    if !cancelled {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("job {} is not pending or running", job_id),
        ));
    }
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

// ==================== Gaps and Resolution ====================

#[derive(Debug, Deserialize)]
struct GapsQuery {
    language: String,
    /// Comma-separated content type names.
    types: Option<String>,
}

async fn list_gaps(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GapsQuery>,
) -> Result<Json<Vec<crate::bulk::Gap>>, ApiError> {
    let language = parse_language(&query.language)?;
    let names: Option<Vec<String>> = query
        .types
        .map(|csv| csv.split(',').map(|s| s.trim().to_string()).collect());
    let types = parse_types(names.as_deref())?;

    let gaps = state.bulk.scan_gaps(&types, language).map_err(internal)?;
    Ok(Json(gaps))
}

#[derive(Debug, Deserialize)]
struct ResolveQuery {
    content_id: ContentId,
    field: String,
    language: String,
}

#[derive(Debug, Serialize)]
struct ResolveResponse {
    value: String,
    origin: &'static str,
}

async fn resolve_field(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let language = parse_language(&query.language)?;
    match state.resolver.resolve(query.content_id, &query.field, language) {
        Some(resolved) => Ok(Json(ResolveResponse {
            value: resolved.value,
            origin: match resolved.origin {
                Origin::Override => "override",
                Origin::HomeOverride => "home_override",
                Origin::Default => "default",
            },
        })),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!(
                "no value for content {} field '{}'",
                query.content_id, query.field
            ),
        )),
    }
}

// ==================== Review Queue ====================

#[derive(Debug, Serialize)]
struct ReviewEntry {
    content_id: ContentId,
    flagged_at: String,
    reason: String,
    confidence: f64,
    fast_approval: bool,
    payload: serde_json::Value,
}

async fn list_reviews(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ReviewEntry>>, ApiError> {
    let entries = state
        .review
        .pending()
        .map_err(internal)?
        .into_iter()
        .map(|record| ReviewEntry {
            content_id: record.content_id,
            flagged_at: record.flagged_at,
            reason: record.reason,
            confidence: record.confidence,
            fast_approval: record.fast_approval,
            payload: serde_json::from_str(&record.payload)
                .unwrap_or(serde_json::Value::Null),
        })
        .collect();
    Ok(Json(entries))
}

async fn approve_review(
    State(state): State<Arc<AppState>>,
    Path(content_id): Path<ContentId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.review.approve(content_id).map_err(internal)? {
        Some(_) => Ok(Json(serde_json::json!({ "approved": true }))),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no pending review for content {}", content_id),
        )),
    }
}

// ==================== Schema ====================

#[derive(Debug, Deserialize)]
struct SchemaRequest {
    document: String,
}

#[derive(Debug, Serialize)]
struct SchemaFixResponse {
    document: String,
    warnings: Vec<String>,
}

async fn validate_schema(
    Json(payload): Json<SchemaRequest>,
) -> Json<schema::ValidationReport> {
    Json(schema::validate(&payload.document))
}

async fn fix_schema(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SchemaRequest>,
) -> Result<Json<SchemaFixResponse>, ApiError> {
    let report = schema::validate(&payload.document);
    if report.valid {
        return Ok(Json(SchemaFixResponse {
            document: payload.document,
            warnings: report.warnings,
        }));
    }

    match schema::request_fix(
        &state.llm,
        &payload.document,
        &report.errors,
        RateLimitPolicy::FailFast,
        DEFAULT_TIMEOUT,
    )
    .await
    {
        Ok(document) => {
            let warnings = schema::validate(&document).warnings;
            Ok(Json(SchemaFixResponse { document, warnings }))
        }
        Err(RepairError::Rejected { errors }) => Err(api_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("repair rejected, document still invalid: {:?}", errors),
        )),
        Err(RepairError::Llm(e)) => Err(api_error(
            StatusCode::BAD_GATEWAY,
            format!("provider error: {}", e),
        )),
    }
}

// ==================== Usage and Metrics ====================

async fn usage_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::llm::UsageReport>, ApiError> {
    let report = state
        .ledger
        .month_to_date(state.llm.model())
        .map_err(internal)?;
    Ok(Json(report))
}

async fn metrics_report() -> Json<crate::metrics::MetricsReport> {
    Json(PipelineMetrics::global().report())
}
