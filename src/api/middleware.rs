/// Request metrics middleware
use crate::metrics;
use axum::{extract::MatchedPath, extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Count and time every request, labelled by route template
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    // Route templates keep label cardinality bounded
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    metrics::HTTP_REQUESTS_ACTIVE.inc();
    let start = Instant::now();

    let response = next.run(request).await;

    metrics::HTTP_REQUESTS_ACTIVE.dec();
    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
