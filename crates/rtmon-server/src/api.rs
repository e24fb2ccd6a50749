use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use rtmon_common::{Metric, MetricKind};
use rtmon_storage::StorageError;
use serde::de::DeserializeOwned;
use std::fmt::Write;

/// Error returned by handlers, rendered as a plain-text body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Storage(err @ StorageError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Storage(err @ StorageError::InvalidMetric(_)) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Storage(err) => {
                tracing::error!(error = %err, "Storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, msg).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_kind(raw: &str) -> ApiResult<MetricKind> {
    raw.parse()
        .map_err(|e: rtmon_common::MetricError| ApiError::BadRequest(e.to_string()))
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Builds a metric from the `/update/{type}/{id}/{value}` path segments.
pub fn metric_from_path(kind: &str, id: &str, value: &str) -> ApiResult<Metric> {
    let kind = parse_kind(kind)?;
    let metric = match kind {
        MetricKind::Gauge => value
            .parse::<f64>()
            .map(|v| Metric::gauge(id, v))
            .map_err(|_| ApiError::BadRequest(format!("invalid gauge value '{value}'")))?,
        MetricKind::Counter => value
            .parse::<i64>()
            .map(|d| Metric::counter(id, d))
            .map_err(|_| ApiError::BadRequest(format!("invalid counter delta '{value}'")))?,
    };
    Ok(metric)
}

/// `POST /update/{type}/{id}/{value}`
pub async fn update_from_path(
    State(state): State<AppState>,
    Path((kind, id, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let metric = metric_from_path(&kind, &id, &value)?;
    state.service.update(&metric).await?;
    Ok(StatusCode::OK)
}

/// `GET /value/{type}/{id}`
pub async fn value_from_path(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let kind = parse_kind(&kind)?;
    let metric = state.service.get(&Metric::placeholder(id, kind)).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metric.payload_string(),
    )
        .into_response())
}

/// `POST /update/` with a JSON metric; answers with the stored metric.
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let metric: Metric = parse_json(&body)?;
    let stored = state.service.update(&metric).await?;
    Ok(Json(stored))
}

/// `POST /value/` with `{"id", "type"}`.
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Metric>> {
    let key: Metric = parse_json(&body)?;
    let stored = state.service.get(&key).await?;
    Ok(Json(stored))
}

/// `POST /updates/` with a JSON array of metrics.
pub async fn update_batch(State(state): State<AppState>, body: Bytes) -> ApiResult<StatusCode> {
    let metrics: Vec<Metric> = parse_json(&body)?;
    state.service.update_list(&metrics).await?;
    Ok(StatusCode::OK)
}

/// `GET /`: every metric as an HTML table.
pub async fn index(State(state): State<AppState>) -> ApiResult<Html<String>> {
    let metrics = state.service.get_all().await?;
    Ok(Html(render_table(&metrics)))
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.service.ping().await?;
    Ok(StatusCode::OK)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_table(metrics: &[Metric]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><title>Metrics</title></head><body>\n\
         <table>\n<tr><th>Name</th><th>Type</th><th>Value</th></tr>\n",
    );
    for m in metrics {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&m.id),
            m.kind,
            m.payload_string()
        );
    }
    html.push_str("</table>\n</body></html>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_values_are_parsed_by_kind() {
        assert_eq!(
            metric_from_path("counter", "c", "7").unwrap(),
            Metric::counter("c", 7)
        );
        assert_eq!(
            metric_from_path("gauge", "g", "-0.5").unwrap(),
            Metric::gauge("g", -0.5)
        );
        assert!(matches!(
            metric_from_path("counter", "c", "1.5"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            metric_from_path("histogram", "h", "1"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn table_escapes_names() {
        let html = render_table(&[Metric::gauge("<b>", 1.0)]);
        assert!(html.contains("&lt;b&gt;"));
        assert!(!html.contains("<td><b>"));
    }
}
