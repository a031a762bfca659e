use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error type for hooktrigger operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Hook {0} not found in registry")]
    HookNotFound(i64),

    #[error("No matching trigger found for event: {event} action: {action} in branch: {branch}")]
    NoMatch {
        event: String,
        action: String,
        branch: String,
    },

    #[error("No workflows to execute for repo: {repo} branch: {branch}")]
    NoWorkflows { repo: String, branch: String },

    #[error("Provider call failed: {0}")]
    Transport(String),

    #[error("Hook {hook_id} is not healthy")]
    Unhealthy { hook_id: i64 },

    #[error("Webhook sent from non organizational member (owner id {owner_id})")]
    Spoofed { owner_id: i64 },

    #[error("Webhook signature verification failed: {0}")]
    Signature(String),

    #[error("Unsupported event type: {0}")]
    UnsupportedEvent(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Run {run} is missing the {label} label")]
    MissingLabel { run: String, label: String },

    #[error("No commit status for run phase {0}")]
    UnmappedPhase(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// HTTP status a webhook or health endpoint should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Config(_) | EngineError::UnmappedPhase(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::NotFound(_)
            | EngineError::HookNotFound(_)
            | EngineError::NoMatch { .. }
            | EngineError::NoWorkflows { .. }
            | EngineError::MissingLabel { .. }
            | EngineError::Yaml(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Spoofed { .. } | EngineError::Signature(_) => StatusCode::UNAUTHORIZED,
            EngineError::UnsupportedEvent(_)
            | EngineError::InvalidPayload(_)
            | EngineError::Json(_) => StatusCode::BAD_REQUEST,
            EngineError::Transport(_) | EngineError::Io(_) => StatusCode::BAD_GATEWAY,
            EngineError::Unhealthy { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Helper type for Results that use EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
