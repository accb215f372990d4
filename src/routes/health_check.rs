use actix_web::HttpResponse;

/// GET /health_check
///
/// Liveness only; the store and provider are not probed.
pub async fn health_check() -> HttpResponse {
    tracing::debug!("Health check endpoint called");
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
    }))
}
