use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::{ErrorKind, PipelineError};

/// JSON body of every failed upload
///
/// `kind` and its fields are flattened in, e.g.
/// `{"error": "...", "kind": "ProcessExitedNonZero", "code": 2, "job_id": "..."}`.
/// Never carries file-system paths or the command line.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(flatten)]
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(err: &PipelineError) -> Self {
        ErrorResponse {
            error: err.kind().to_string(),
            kind: err.kind().clone(),
            job_id: err.job_id(),
            diagnostics: err.diagnostics().map(str::to_string),
        }
    }
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NoFileProvided | ErrorKind::MalformedUpload => StatusCode::BAD_REQUEST,
            ErrorKind::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::WorkspaceUnavailable
            | ErrorKind::ProcessLaunchFailed
            | ErrorKind::ProcessExitedNonZero { .. }
            | ErrorKind::ProcessTimedOut
            | ErrorKind::OutputMissingOrEmpty
            | ErrorKind::DecodeFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        debug!("Responding {} for: {}", self.status_code(), self);
        HttpResponse::build(self.status_code()).json(ErrorResponse::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kinds_to_status_codes() {
        let status = |kind| PipelineError::new(kind).status_code();
        assert_eq!(status(ErrorKind::NoFileProvided), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(ErrorKind::UploadTooLarge { limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status(ErrorKind::ProcessExitedNonZero { code: 2 }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status(ErrorKind::ProcessTimedOut), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn body_flattens_kind_and_omits_empty_fields() {
        let err = PipelineError::new(ErrorKind::ProcessExitedNonZero { code: 2 })
            .with_diagnostics("boom");
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": "the transformation process exited with code 2",
                "kind": "ProcessExitedNonZero",
                "code": 2,
                "diagnostics": "boom",
            })
        );

        let err = PipelineError::new(ErrorKind::NoFileProvided);
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"error": "no file was provided", "kind": "NoFileProvided"})
        );
    }
}
