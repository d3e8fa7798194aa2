//! Liveness probe endpoint.

/// Returns 200 OK while the process is serving.
pub async fn health_handler() -> &'static str {
    "OK"
}
