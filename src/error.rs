//! Error handling for MCE Server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// MQTT broker has no live connection (local transport fault)
    #[error("MQTT broker not available")]
    BrokerUnavailable,

    /// Edge gateway did not answer within the deadline (remote fault)
    #[error("Edge gateway '{gateway_id}' did not respond within {timeout_ms}ms")]
    EdgeTimeout { gateway_id: String, timeout_ms: u64 },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            // ブローカー未接続はローカル障害 → 即リトライ可
            Error::BrokerUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BROKER_UNAVAILABLE",
                self.to_string(),
            ),
            // 応答なしはリモート障害 → "device offline" としてユーザーに提示
            Error::EdgeTimeout { .. } => (
                StatusCode::GATEWAY_TIMEOUT,
                "DEVICE_OFFLINE",
                self.to_string(),
            ),
            Error::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
