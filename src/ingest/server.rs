//! The receiver's HTTP surface: push endpoints, health checks, metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::ReceiverConfig;
use crate::ingest::pipeline::IngestPipeline;
use crate::metrics::Registry;
use crate::model::{LogEntry, LokiPushRequest, RawLogRecord};
use crate::redact::Redactor;

pub struct AppState {
    pub pipeline: IngestPipeline,
    pub metrics: Arc<Registry>,
    pub redactor: Redactor,
}

pub fn build_router(config: &ReceiverConfig, state: Arc<AppState>) -> Router {
    Router::new()
        .route("/loki/api/v1/push", post(push_loki))
        .route("/logtap/raw", post(push_raw))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/version", get(version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(config.max_request_bytes)),
        )
        .with_state(state)
}

async fn push_loki(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let start = Instant::now();
    let req: LokiPushRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return (StatusCode::BAD_REQUEST, "malformed json").into_response(),
    };

    let mut accepted = 0u64;
    for stream in req.streams {
        for (ns_ts, msg) in stream.values {
            let ts = parse_ns_timestamp(&ns_ts).unwrap_or_else(Utc::now);
            let msg = state.redactor.redact(&msg, &state.metrics);
            let entry = LogEntry::new(ts, stream.stream.clone(), msg);
            state.pipeline.try_enqueue(entry);
            accepted += 1;
        }
    }
    state.metrics.inc_lines_received(accepted);
    state.metrics.observe_push_duration(start.elapsed());
    StatusCode::NO_CONTENT.into_response()
}

async fn push_raw(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let start = Instant::now();
    let text = match std::str::from_utf8(&body) {
        Ok(t) => t,
        Err(_) => return (StatusCode::BAD_REQUEST, "body is not valid utf-8").into_response(),
    };

    let mut accepted = 0u64;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record: RawLogRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => {
                state.metrics.inc_malformed();
                continue;
            }
        };
        let msg = state.redactor.redact(&record.msg, &state.metrics);
        let entry = LogEntry::new(record.ts, record.labels, msg);
        state.pipeline.try_enqueue(entry);
        accepted += 1;
    }
    state.metrics.inc_lines_received(accepted);
    state.metrics.observe_push_duration(start.elapsed());
    StatusCode::NO_CONTENT.into_response()
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.pipeline.queue_fill_ratio() < 0.9 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    api: u32,
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        api: 1,
    })
}

/// Loki's wire timestamp is nanoseconds-since-epoch as a decimal string.
fn parse_ns_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let nanos: i64 = s.parse().ok()?;
    Some(DateTime::from_timestamp_nanos(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_ns_timestamp() {
        let ts = parse_ns_timestamp("1700000000000000000").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn rejects_garbage_timestamp() {
        assert!(parse_ns_timestamp("not-a-number").is_none());
    }
}
