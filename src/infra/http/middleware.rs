use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use metrics::{counter, histogram};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

const METRIC_HTTP_REQUESTS: &str = "rolodex_http_requests_total";
const METRIC_HTTP_REQUEST_ERRORS: &str = "rolodex_http_request_errors_total";
const METRIC_HTTP_REQUEST_DURATION: &str = "rolodex_http_request_duration_seconds";
const UNMATCHED_ROUTE: &str = "unmatched";

#[derive(Clone)]
pub struct RequestContext {
    pub correlation_id: String,
}

/// Prefer the caller's correlation id, then its request id, then mint one.
fn correlation_id(headers: &HeaderMap) -> String {
    [CORRELATION_ID_HEADER, REQUEST_ID_HEADER]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = correlation_id(request.headers());
    let ctx = RequestContext {
        correlation_id: correlation_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let span = info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Route template for metric labels, so ids in paths do not explode cardinality.
fn route_label(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

fn record_request_metrics(method: &str, route: &str, status: StatusCode, elapsed_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status_code", status.as_u16().to_string()),
    ];
    counter!(METRIC_HTTP_REQUESTS, &labels).increment(1);
    histogram!(METRIC_HTTP_REQUEST_DURATION, &labels).record(elapsed_secs);

    if status.is_client_error() || status.is_server_error() {
        let error_type = if status.is_server_error() {
            "server_error"
        } else {
            "client_error"
        };
        counter!(
            METRIC_HTTP_REQUEST_ERRORS,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "error_type" => error_type,
        )
        .increment(1);
    }
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let route = route_label(&request);
    let start = Instant::now();

    let correlation_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.correlation_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_millis();

    record_request_metrics(method.as_str(), &route, status, elapsed.as_secs_f64());
    info!(
        target = "rolodex::http::response",
        status = status.as_u16(),
        method = %method,
        route = %route,
        elapsed_ms = elapsed_ms,
        correlation_id = correlation_id,
        "Request completed",
    );

    if status.is_client_error() || status.is_server_error() {
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "rolodex::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                correlation_id = correlation_id,
                "request failed",
            );
        } else {
            warn!(
                target = "rolodex::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                correlation_id = correlation_id,
                "client request error",
            );
        }
    }

    response
}
