use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pulsemon_common::types::{Metric, MetricKey, MetricPayload, MetricValue};
use pulsemon_common::validate::{validate, Field, ValidationError};
use pulsemon_storage::error::StorageError;
use serde::Serialize;
use std::fmt::Write;

/// JSON error envelope.
#[derive(Serialize)]
pub struct ApiError {
    pub err_code: String,
    pub err_msg: String,
    pub trace_id: String,
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiError {
            err_code: code.to_string(),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
        }),
    )
        .into_response()
}

fn validation_response(trace_id: &str, err: &ValidationError) -> Response {
    error_response(StatusCode::BAD_REQUEST, trace_id, "invalid_metric", &err.to_string())
}

fn storage_response(trace_id: &str, err: &StorageError) -> Response {
    tracing::error!(trace_id = %trace_id, error = %err, "Storage operation failed");
    match err {
        StorageError::CounterOverflow { .. } => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "counter_overflow", &err.to_string())
        }
        _ => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            trace_id,
            "storage_error",
            "storage unavailable",
        ),
    }
}

/// Plain-text counterpart of [`storage_response`] for the URL and HTML
/// endpoints.
fn plain_storage_response(trace_id: &str, err: &StorageError) -> Response {
    tracing::error!(trace_id = %trace_id, error = %err, "Storage operation failed");
    match err {
        StorageError::CounterOverflow { .. } => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "storage unavailable").into_response(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(trace_id: &str, body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(StatusCode::BAD_REQUEST, trace_id, "invalid_json", &e.to_string())
    })
}

fn into_metric(trace_id: &str, payload: MetricPayload) -> Result<Metric, Response> {
    Metric::try_from(payload).map_err(|e| validation_response(trace_id, &e))
}

/// `POST /update/`: merges one metric and returns the stored record.
async fn update_json(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let metric = match decode(&trace_id, &body).and_then(|p| into_metric(&trace_id, p)) {
        Ok(metric) => metric,
        Err(resp) => return resp,
    };
    match state.storage.save(metric).await {
        Ok(saved) => (StatusCode::OK, Json(saved)).into_response(),
        Err(e) => storage_response(&trace_id, &e),
    }
}

/// `POST /updates/`: merges a JSON array in order and echoes the stored
/// records. Nothing is saved when any element fails validation.
async fn update_batch(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let payloads: Vec<MetricPayload> = match decode(&trace_id, &body) {
        Ok(payloads) => payloads,
        Err(resp) => return resp,
    };
    let metrics = match payloads
        .into_iter()
        .map(|p| into_metric(&trace_id, p))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(metrics) => metrics,
        Err(resp) => return resp,
    };
    match state.storage.save_all(&metrics).await {
        Ok(saved) => {
            tracing::debug!(trace_id = %*trace_id, count = saved.len(), "Batch stored");
            (StatusCode::OK, Json(saved)).into_response()
        }
        Err(e) => storage_response(&trace_id, &e),
    }
}

/// `POST /value/`: looks up a metric by the id and type of the payload.
async fn value_json(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let key = match decode::<MetricPayload>(&trace_id, &body)
        .and_then(|p| p.key().map_err(|e| validation_response(&trace_id, &e)))
    {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    match state.storage.get(&key).await {
        Ok(Some(metric)) => (StatusCode::OK, Json(metric)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "metric_not_found",
            &format!("metric {key} not found"),
        ),
        Err(e) => storage_response(&trace_id, &e),
    }
}

/// Validates id and type from URL segments. An empty id is 404, any other
/// problem 400.
fn unary_key(kind: &str, id: &str) -> Result<MetricKey, (StatusCode, String)> {
    let payload = MetricPayload {
        id: id.to_string(),
        kind: kind.to_string(),
        ..Default::default()
    };
    validate(&payload, &[Field::Id, Field::Type])
        .and_then(|()| payload.key())
        .map_err(|e| match e {
            ValidationError::EmptyId => (StatusCode::NOT_FOUND, e.to_string()),
            other => (StatusCode::BAD_REQUEST, other.to_string()),
        })
}

/// `POST /update/{type}/{name}/{value}`.
async fn update_unary(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((kind, id, raw)): Path<(String, String, String)>,
) -> Response {
    let key = match unary_key(&kind, &id) {
        Ok(key) => key,
        Err(resp) => return resp.into_response(),
    };
    let value = match MetricValue::parse(key.kind, &raw) {
        Ok(value) => value,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match state.storage.save(Metric { id: key.id, value }).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => plain_storage_response(&trace_id, &e),
    }
}

/// `GET /value/{type}/{name}`: the stored value as plain text.
async fn value_unary(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Response {
    let key = match unary_key(&kind, &id) {
        Ok(key) => key,
        Err(resp) => return resp.into_response(),
    };
    match state.storage.get(&key).await {
        Ok(Some(metric)) => metric.value.to_string().into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("metric {key} not found")).into_response(),
        Err(e) => plain_storage_response(&trace_id, &e),
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn render_listing(metrics: &[Metric]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><title>Metrics</title></head><body>\n<ul>\n",
    );
    for metric in metrics {
        let _ = writeln!(
            html,
            "<li>{} ({}): {}</li>",
            escape_html(&metric.id),
            metric.kind(),
            metric.value
        );
    }
    html.push_str("</ul>\n</body></html>\n");
    html
}

/// `GET /`: every stored metric as an HTML list.
async fn index(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.storage.get_all().await {
        Ok(metrics) => Html(render_listing(&metrics)).into_response(),
        Err(e) => plain_storage_response(&trace_id, &e),
    }
}

/// `GET /ping`: 200 only when a database backend is configured and answers.
async fn ping(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let Some(db) = state.database.as_ref() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "database not configured").into_response();
    };
    match db.ping().await {
        Ok(()) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "OK").into_response(),
        Err(e) => {
            tracing::error!(trace_id = %*trace_id, error = %e, "Database ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "database unreachable").into_response()
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_batch))
        .route("/value/", post(value_json))
        .route("/update/{kind}/{id}/{value}", post(update_unary))
        .route("/value/{kind}/{id}", get(value_unary))
}
