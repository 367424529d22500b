use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::types::format_timestamp;

pub const API_VERSION: &str = "v1";

/// Which tenant, collection and verb a response describes
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub database: String,
    pub collection: String,
    pub method: Method,
}

impl RouteContext {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, method: Method) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            method,
        }
    }
}

/// Wrapper for API responses that automatically adds the success envelope
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub context: RouteContext,
    pub message: String,
    pub data: T,
    pub status_code: Option<StatusCode>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful API response with default 200 status
    pub fn success(context: RouteContext, message: impl Into<String>, data: T) -> Self {
        Self {
            context,
            message: message.into(),
            data,
            status_code: None,
        }
    }

    /// Create a 201 Created response
    pub fn created(context: RouteContext, message: impl Into<String>, data: T) -> Self {
        Self {
            status_code: Some(StatusCode::CREATED),
            ..Self::success(context, message, data)
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status_code.unwrap_or(StatusCode::OK);

        let data_value = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "success": false,
                        "message": "Failed to serialize response data",
                        "code": "INTERNAL_SERVER_ERROR"
                    })),
                )
                    .into_response();
            }
        };

        (status, Json(envelope(&self.context, &self.message, data_value))).into_response()
    }
}

fn envelope(context: &RouteContext, message: &str, data: Value) -> Value {
    json!({
        "success": true,
        "message": message,
        "data": {
            "database": context.database,
            "collection": context.collection,
            "method": context.method.as_str(),
            "data": data,
            "meta": {
                "timestamp": format_timestamp(&chrono::Utc::now()),
                "version": env!("CARGO_PKG_VERSION"),
                "apiVersion": API_VERSION
            }
        }
    })
}

pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::ApiError>;
