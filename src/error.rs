use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Page not found: {0}")]
    PageNotFound(String),

    #[error("Audit run not found: {0}")]
    RunNotFound(String),

    #[error("Audit run {0} is already finished")]
    RunAlreadyFinished(String),

    #[error("An audit run is already in progress")]
    AuditInProgress,

    #[error("Audit run cancelled")]
    Cancelled,

    #[error("Audit run {run_id} failed: {cause}")]
    RunFailed {
        run_id: String,
        #[source]
        cause: Box<AuditError>,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl AuditError {
    /// True when the error (or the cause of a failed run) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            AuditError::Cancelled => true,
            AuditError::RunFailed { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuditError::PageNotFound(_) => StatusCode::NOT_FOUND,
            AuditError::RunNotFound(_) => StatusCode::NOT_FOUND,
            AuditError::RunAlreadyFinished(_) => StatusCode::CONFLICT,
            AuditError::AuditInProgress => StatusCode::CONFLICT,
            AuditError::Cancelled => StatusCode::CONFLICT,
            AuditError::RunFailed { cause, .. } if cause.is_cancelled() => StatusCode::CONFLICT,
            AuditError::RunFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AuditError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({
            "error": self.to_string(),
        });
        if let AuditError::RunFailed { run_id, .. } = &self {
            body["run_id"] = serde_json::Value::String(run_id.clone());
        }

        (status, axum::Json(body)).into_response()
    }
}
