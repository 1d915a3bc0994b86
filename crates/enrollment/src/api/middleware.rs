//! Request logging middleware.

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{debug, warn};

/// Log method, path, status and latency of every request.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        warn!(%method, %path, %status, ?duration, "Request failed");
    } else {
        debug!(%method, %path, %status, ?duration, "Request completed");
    }

    response
}
