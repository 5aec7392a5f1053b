use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::error::{ErrorKind, PipelineError};
use super::workspace::WORKSPACE_PREFIX;

const INPUT_FILE_NAME: &str = "input.csv";
const OUTPUT_FILE_NAME: &str = "output.csv";

/// Lifecycle of one upload job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// `Pending -> Running -> {Succeeded, Failed}`; a job whose upload
    /// fails goes straight from `Pending` to `Failed`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One in-flight upload and the private directory holding its files
///
/// The workspace directory (and with it the input and output files) is
/// removed when the job is concluded or dropped.
#[derive(Debug)]
pub struct UploadJob {
    id: Uuid,
    workspace: TempDir,
    input_path: PathBuf,
    output_path: PathBuf,
    status: JobStatus,
    created_at: DateTime<Utc>,
    received_bytes: u64,
}

impl UploadJob {
    /// Create a pending job with a fresh workspace under `work_root`.
    pub fn create(work_root: &Path) -> io::Result<Self> {
        let id = Uuid::new_v4();
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{}{}-", WORKSPACE_PREFIX, id))
            .tempdir_in(work_root)?;
        let input_path = workspace.path().join(INPUT_FILE_NAME);
        let output_path = workspace.path().join(OUTPUT_FILE_NAME);

        debug!("Job {}: workspace created", id);
        Ok(Self {
            id,
            workspace,
            input_path,
            output_path,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            received_bytes: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            debug!("Job {}: {:?} -> {:?}", self.id, self.status, next);
            self.status = next;
            true
        } else {
            error!(
                "Job {}: refused illegal transition {:?} -> {:?}",
                self.id, self.status, next
            );
            false
        }
    }

    /// Build a failure for this job, marking it failed.
    pub fn fail(&mut self, kind: ErrorKind) -> PipelineError {
        if !self.status.is_terminal() {
            self.advance(JobStatus::Failed);
        }
        PipelineError::new(kind).for_job(self.id)
    }

    /// Stream the uploaded bytes into the job's input file
    ///
    /// The file is flushed and synced before returning, so the process
    /// launched afterwards always sees the complete upload.
    ///
    /// # Errors
    /// - `UploadTooLarge` once more than `limit` bytes arrive
    /// - `NoFileProvided` if the upload is empty
    /// - `MalformedUpload` if the body stream breaks off
    /// - `WorkspaceUnavailable` if the file cannot be written
    pub async fn receive_input<S, B, E>(
        &mut self,
        mut chunks: S,
        limit: usize,
    ) -> Result<u64, PipelineError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut file = match tokio::fs::File::create(&self.input_path).await {
            Ok(file) => file,
            Err(e) => {
                error!("Job {}: cannot create input file: {:?}", self.id, e);
                return Err(self.fail(ErrorKind::WorkspaceUnavailable));
            }
        };

        let mut total: u64 = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Job {}: upload stream failed: {}", self.id, e);
                    return Err(self.fail(ErrorKind::MalformedUpload));
                }
            };
            let bytes = chunk.as_ref();
            total += bytes.len() as u64;
            if total > limit as u64 {
                warn!("Job {}: upload exceeds limit of {} bytes", self.id, limit);
                return Err(self.fail(ErrorKind::UploadTooLarge { limit }));
            }
            if let Err(e) = file.write_all(bytes).await {
                error!("Job {}: failed writing input file: {:?}", self.id, e);
                return Err(self.fail(ErrorKind::WorkspaceUnavailable));
            }
        }

        if total == 0 {
            warn!("Job {}: uploaded file is empty", self.id);
            return Err(self.fail(ErrorKind::NoFileProvided));
        }

        let synced = async {
            file.flush().await?;
            file.sync_all().await
        };
        if let Err(e) = synced.await {
            error!("Job {}: failed to sync input file: {:?}", self.id, e);
            return Err(self.fail(ErrorKind::WorkspaceUnavailable));
        }

        self.received_bytes = total;
        debug!("Job {}: received {} bytes", self.id, total);
        Ok(total)
    }

    /// Replace this job's file-system paths in `text` with placeholders.
    pub fn redact(&self, text: &str) -> String {
        let replacements = [
            (self.input_path.as_path(), "<input>"),
            (self.output_path.as_path(), "<output>"),
            (self.workspace.path(), "<workspace>"),
        ];
        replacements
            .iter()
            .fold(text.to_string(), |acc, (path, placeholder)| {
                acc.replace(&*path.to_string_lossy(), placeholder)
            })
    }

    /// Remove the workspace and both files. Returns the final status.
    pub fn conclude(self) -> JobStatus {
        let elapsed = Utc::now() - self.created_at;
        let UploadJob {
            id,
            workspace,
            status,
            ..
        } = self;
        if let Err(e) = workspace.close() {
            error!("Job {}: failed to remove workspace: {:?}", id, e);
        }
        debug!(
            "Job {}: concluded as {:?} after {} ms",
            id,
            status,
            elapsed.num_milliseconds()
        );
        status
    }
}
