//! API route definitions.

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::alerts::{Alert, AlertData, AlertKind};
use crate::export::{self, ExportFormat, ExportKind, Rendered, DEFAULT_EXPORT_LIMIT};
use crate::features::FeatureVector;
use crate::ml::RiskPrediction;
use crate::storage::telemetry::{self, NewTelemetry, TelemetryFilter, TelemetryRecord};
use crate::storage::Pool;

const DEFAULT_PAGE_LIMIT: u32 = 100;
const MAX_PAGE_LIMIT: u32 = 1000;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/telemetry", post(create_telemetry).get(list_telemetry))
        .route("/telemetry/violations", get(list_violations))
        .route("/telemetry/high-latency", get(list_high_latency))
        .route("/telemetry/{id}", get(get_telemetry))
        .route("/predict", post(predict))
        .route("/predict-and-store", post(predict_and_store))
        .route("/explain/{id}", get(explain))
        .route("/anomaly", post(anomaly))
        .route("/export/sla-metrics", get(export_sla_metrics))
        .route("/export/bandwidth-usage", get(export_bandwidth_usage))
        .route("/alerts/send", post(send_alert))
        .route("/stats", get(stats))
        .route("/network/topology", get(network_topology))
        .route("/models/info", get(models_info))
}

/// `high` above 0.7, `medium` above 0.4.
pub fn risk_level(probability: f64) -> &'static str {
    if probability > 0.7 {
        "high"
    } else if probability > 0.4 {
        "medium"
    } else {
        "low"
    }
}

/// `high` above 0.8, `medium` above 0.5.
pub fn severity(anomaly_score: f64) -> &'static str {
    if anomaly_score > 0.8 {
        "high"
    } else if anomaly_score > 0.5 {
        "medium"
    } else {
        "low"
    }
}

fn envelope<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({
        "data": data,
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Run `f` on a pooled connection off the async runtime.
async fn with_conn<T, F>(pool: &Pool, f: F) -> ApiResult<T>
where
    F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    let result = tokio::task::spawn_blocking(move || {
        let conn = pool.get().context("failed to get database connection")?;
        f(&*conn)
    })
    .await
    .context("database task failed")?;
    Ok(result?)
}

async fn fetch_record(pool: &Pool, id: i64) -> ApiResult<TelemetryRecord> {
    with_conn(pool, move |conn| telemetry::get(conn, id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("telemetry record {} not found", id)))
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

async fn root() -> Json<Value> {
    envelope(json!({
        "message": "slawatch SLA prediction API",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match with_conn(&state.pool, |conn| {
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .context("database ping failed")
    })
    .await
    {
        Ok(_) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "health check database ping failed");
            "unavailable"
        }
    };
    let models = state.predictor.state().name();
    let status = if database == "connected" && models == "ready" {
        "ok"
    } else {
        "degraded"
    };
    envelope(json!({
        "status": status,
        "database": database,
        "models": models,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn models_info(State(state): State<AppState>) -> Json<Value> {
    let inventory = state.predictor.describe_loaded_models();
    envelope(json!({
        "state": state.predictor.state().name(),
        "loaded": inventory.loaded,
        "available_models": inventory.available_models,
        "feature_names": inventory.feature_names,
        "model_directory": inventory.model_directory
    }))
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

async fn create_telemetry(
    State(state): State<AppState>,
    Json(body): Json<NewTelemetry>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    body.validate().map_err(ApiError::BadRequest)?;
    let record = with_conn(&state.pool, move |conn| telemetry::insert(conn, &body)).await?;
    tracing::info!(id = record.id, source = %record.network_measure, target = %record.network_target, "telemetry stored");
    Ok((StatusCode::CREATED, envelope(record)))
}

async fn list_telemetry(
    State(state): State<AppState>,
    Query(mut filter): Query<TelemetryFilter>,
) -> ApiResult<Json<Value>> {
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT));
    let records = with_conn(&state.pool, move |conn| telemetry::list(conn, &filter)).await?;
    let total = records.len();
    Ok(Json(json!({
        "data": records,
        "meta": { "total": total, "timestamp": Utc::now().to_rfc3339() }
    })))
}

#[derive(Debug, Default, Deserialize)]
struct RecentQuery {
    limit: Option<u32>,
    threshold_ms: Option<f64>,
}

async fn list_violations(State(state): State<AppState>, Query(q): Query<RecentQuery>) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    let records = with_conn(&state.pool, move |conn| telemetry::list_violations(conn, limit)).await?;
    Ok(envelope(records))
}

async fn list_high_latency(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
    let threshold = q.threshold_ms.unwrap_or(telemetry::STATS_ANOMALY_LATENCY_MS);
    let records = with_conn(&state.pool, move |conn| telemetry::list_high_latency(conn, threshold, limit)).await?;
    Ok(envelope(records))
}

async fn get_telemetry(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    Ok(envelope(fetch_record(&state.pool, id).await?))
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct PredictionView {
    sla_violation: u8,
    risk_score: f64,
    confidence: f64,
    risk_level: &'static str,
    model_version: String,
    input_validation: &'static str,
    features_used: FeatureVector,
    timestamp: DateTime<Utc>,
}

impl PredictionView {
    fn new(p: RiskPrediction, features: FeatureVector) -> Self {
        Self {
            sla_violation: u8::from(p.label),
            risk_score: p.probability,
            confidence: p.confidence,
            risk_level: risk_level(p.probability),
            model_version: p.model_version,
            input_validation: "passed",
            features_used: features,
            timestamp: Utc::now(),
        }
    }
}

async fn predict(State(state): State<AppState>, Json(v): Json<FeatureVector>) -> ApiResult<Json<Value>> {
    let prediction = state.predictor.predict_risk(&v)?;
    Ok(envelope(PredictionView::new(prediction, v)))
}

async fn predict_and_store(
    State(state): State<AppState>,
    Json(mut body): Json<NewTelemetry>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    body.validate().map_err(ApiError::BadRequest)?;
    let features = body.features();
    let prediction = state.predictor.predict_risk(&features)?;
    body.sla_violation = Some(prediction.label);
    body.model_version = Some(prediction.model_version.clone());

    let record = with_conn(&state.pool, move |conn| telemetry::insert(conn, &body)).await?;

    let threshold = state.config.alerts.high_risk_threshold;
    let alert_triggered = prediction.probability > threshold;
    if alert_triggered {
        tracing::warn!(
            id = record.id,
            risk = prediction.probability,
            threshold,
            "high SLA violation risk"
        );
        let alert = Alert {
            kind: AlertKind::SlaViolation,
            data: AlertData {
                source: Some(record.network_measure.clone()),
                target: Some(record.network_target.clone()),
                risk_score: Some(prediction.probability),
                latency: Some(record.latency),
                packet_loss: Some(record.packet_loss),
                jitter: Some(record.jitter),
                congestion: Some(record.congestion),
                telemetry_id: Some(record.id),
                ..Default::default()
            },
        };
        let alerts = state.alerts.clone();
        tokio::spawn(async move {
            alerts.send_default(&alert).await;
        });
    }

    Ok((
        StatusCode::CREATED,
        envelope(json!({
            "telemetry_id": record.id,
            "prediction": PredictionView::new(prediction, features),
            "alert_triggered": alert_triggered
        })),
    ))
}

async fn explain(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Value>> {
    let record = fetch_record(&state.pool, id).await?;
    let features = record.features();
    let explanation = state.predictor.explain(&features)?;
    let model_version = state.predictor.bundle()?.classifier.model_version().to_string();
    Ok(envelope(json!({
        "telemetry_id": record.id,
        "feature_importance": explanation.per_feature_contribution,
        "shap_values": explanation.ordered_values(),
        "base_value": explanation.base_value,
        "model_version": model_version,
        "timestamp": Utc::now()
    })))
}

async fn anomaly(State(state): State<AppState>, Json(v): Json<FeatureVector>) -> ApiResult<Json<Value>> {
    let result = state.predictor.detect_anomaly(&v)?;
    let model_type = if state.predictor.bundle()?.detector.is_fallback() {
        "fallback_rules"
    } else {
        "isolation_forest"
    };
    let recommended_action = if result.is_anomaly {
        if result.score > 0.8 {
            "immediate_investigation"
        } else {
            "monitor_closely"
        }
    } else {
        "none"
    };
    Ok(envelope(json!({
        "is_anomaly": result.is_anomaly,
        "anomaly_score": result.score,
        "severity": severity(result.score),
        "explanation": result.explanation,
        "recommended_action": recommended_action,
        "model_type": model_type,
        "timestamp": Utc::now()
    })))
}

// ---------------------------------------------------------------------------
// Exports
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ExportQuery {
    format: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    limit: Option<u32>,
}

async fn export_sla_metrics(State(state): State<AppState>, Query(q): Query<ExportQuery>) -> ApiResult<Json<Value>> {
    run_export(&state, ExportKind::SlaMetrics, q).await
}

async fn export_bandwidth_usage(
    State(state): State<AppState>,
    Query(q): Query<ExportQuery>,
) -> ApiResult<Json<Value>> {
    run_export(&state, ExportKind::BandwidthUsage, q).await
}

async fn run_export(state: &AppState, kind: ExportKind, q: ExportQuery) -> ApiResult<Json<Value>> {
    let format = q
        .format
        .as_deref()
        .unwrap_or("csv")
        .parse::<ExportFormat>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let filter = TelemetryFilter {
        limit: Some(q.limit.unwrap_or(DEFAULT_EXPORT_LIMIT)),
        start_time: q.start_time,
        end_time: q.end_time,
        ..Default::default()
    };
    let records = with_conn(&state.pool, move |conn| telemetry::list(conn, &filter)).await?;
    let rows = records.len();
    match export::render(kind, format, &records, Utc::now())? {
        Rendered::Csv { filename, data } => {
            tracing::info!(kind = kind.file_stem(), rows, %filename, "export rendered");
            Ok(envelope(json!({ "data": data, "filename": filename })))
        }
        Rendered::Json(value) => Ok(envelope(value)),
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AlertRequest {
    #[serde(rename = "type", default = "default_alert_type")]
    kind: String,
    #[serde(default)]
    data: AlertData,
    email: Option<String>,
    telegram: Option<String>,
}

fn default_alert_type() -> String {
    "system".to_string()
}

async fn send_alert(
    State(state): State<AppState>,
    Json(req): Json<AlertRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if req.email.is_none() && req.telegram.is_none() {
        return Err(ApiError::BadRequest(
            "at least one of email or telegram is required".to_string(),
        ));
    }
    let alert = Alert {
        kind: AlertKind::parse_lossy(&req.kind),
        data: req.data,
    };
    let alerts = state.alerts.clone();
    tokio::spawn(async move {
        let results = alerts
            .send_multi_channel(&alert, req.email.as_deref(), req.telegram.as_deref())
            .await;
        tracing::info!(kind = alert.kind.as_str(), ?results, "alert dispatch finished");
    });
    Ok((
        StatusCode::ACCEPTED,
        envelope(json!({
            "status": "alert_queued",
            "message": "Alert is being sent in the background"
        })),
    ))
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

async fn stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = with_conn(&state.pool, |conn| telemetry::stats(conn, Utc::now())).await?;
    Ok(envelope(stats))
}

async fn network_topology(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let summary = with_conn(&state.pool, telemetry::network_summary).await?;
    Ok(envelope(summary))
}
