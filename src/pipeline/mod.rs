pub mod decoder;
pub mod error;
pub mod job;
pub mod runner;
pub mod service;
pub mod workspace;

// Re-export commonly used types
pub use decoder::{DecodeError, RowPolicy, TableDecoder, TableRow};
pub use error::{ErrorKind, PipelineError};
pub use job::{JobStatus, UploadJob};
pub use runner::{ProcessOutcome, ProcessRunner, RunError};
pub use service::{PipelineResult, PipelineSettings, UploadPipeline};
