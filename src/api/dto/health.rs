//! DTOs for health check endpoint.

use serde::Serialize;

/// Health check response with component status.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

/// Health status for each shared resource.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub cache: CheckStatus,
    pub broker: CheckStatus,
}

/// Individual component health status.
#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckStatus {
    pub fn from_check(ok: bool, ok_message: &str, error_message: &str) -> Self {
        let (status, message) = if ok {
            ("ok", ok_message)
        } else {
            ("error", error_message)
        };
        Self {
            status: status.to_string(),
            message: Some(message.to_string()),
        }
    }
}
