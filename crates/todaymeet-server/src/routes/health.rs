//! Liveness check.

/// GET /healthz
pub async fn healthz() -> &'static str {
    "OK"
}
