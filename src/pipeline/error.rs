use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Longest diagnostic excerpt returned to a caller, in characters.
pub const DIAGNOSTIC_EXCERPT_CHARS: usize = 1024;

/// Machine-distinguishable reason a job (or request) failed
///
/// Serialized with the variant name under `kind`, plus any variant fields,
/// e.g. `{"kind": "ProcessExitedNonZero", "code": 2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind")]
pub enum ErrorKind {
    #[error("no file was provided")]
    NoFileProvided,

    #[error("upload exceeds the limit of {limit} bytes")]
    UploadTooLarge { limit: usize },

    #[error("the multipart request body could not be read")]
    MalformedUpload,

    #[error("a workspace for the job could not be prepared")]
    WorkspaceUnavailable,

    #[error("the transformation process could not be launched")]
    ProcessLaunchFailed,

    #[error("the transformation process exited with code {code}")]
    ProcessExitedNonZero { code: i32 },

    #[error("the transformation process timed out")]
    ProcessTimedOut,

    #[error("the transformation produced no output")]
    OutputMissingOrEmpty,

    #[error("the transformation output could not be decoded: {reason}")]
    DecodeFailed { reason: String },
}

/// Terminal failure of one upload, carried to the HTTP boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineError {
    kind: ErrorKind,
    job_id: Option<Uuid>,
    diagnostics: Option<String>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            job_id: None,
            diagnostics: None,
        }
    }

    pub fn for_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Attach captured process output. Empty text is ignored, long text is
    /// truncated to [`DIAGNOSTIC_EXCERPT_CHARS`].
    pub fn with_diagnostics(mut self, text: &str) -> Self {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.diagnostics = Some(truncate_chars(trimmed, DIAGNOSTIC_EXCERPT_CHARS));
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn job_id(&self) -> Option<Uuid> {
        self.job_id
    }

    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }
}

impl From<ErrorKind> for PipelineError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.job_id {
            Some(id) => write!(f, "job {}: {}", id, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for PipelineError {}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_with_variant_tag_and_fields() {
        let value = serde_json::to_value(ErrorKind::ProcessExitedNonZero { code: 2 }).unwrap();
        assert_eq!(value, serde_json::json!({"kind": "ProcessExitedNonZero", "code": 2}));

        let value = serde_json::to_value(ErrorKind::NoFileProvided).unwrap();
        assert_eq!(value, serde_json::json!({"kind": "NoFileProvided"}));
    }

    #[test]
    fn diagnostics_are_trimmed_and_truncated() {
        let long = "x".repeat(DIAGNOSTIC_EXCERPT_CHARS + 50);
        let err = PipelineError::new(ErrorKind::ProcessTimedOut).with_diagnostics(&long);
        let diag = err.diagnostics().unwrap();
        assert_eq!(diag.chars().count(), DIAGNOSTIC_EXCERPT_CHARS + 1);
        assert!(diag.ends_with('…'));

        let err = PipelineError::new(ErrorKind::ProcessTimedOut).with_diagnostics("  \n ");
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn display_includes_job_id_when_known() {
        let id = Uuid::new_v4();
        let err = PipelineError::new(ErrorKind::OutputMissingOrEmpty).for_job(id);
        assert_eq!(err.to_string(), format!("job {}: the transformation produced no output", id));
    }
}
