use axum::response::Json;
use serde_json::{json, Value};

/// GET / - service banner
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Docbase API",
            "version": env!("CARGO_PKG_VERSION"),
            "apiVersion": crate::middleware::response::API_VERSION,
            "description": "Schema-governed multi-tenant document API",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "collections": "GET /api/app/collection?db= (protected)",
                "app": "/api/app/:collection?db=[&id=&page=&limit=] (protected)",
            }
        }
    }))
}

/// GET /health - liveness only
pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "timestamp": crate::types::format_timestamp(&chrono::Utc::now()),
        }
    }))
}
