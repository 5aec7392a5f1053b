use futures_util::Stream;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::decoder::{RowPolicy, TableDecoder, TableRow};
use super::error::{ErrorKind, PipelineError};
use super::job::{JobStatus, UploadJob};
use super::runner::{ProcessRunner, RunError};

pub type PipelineResult = Result<Vec<TableRow>, PipelineError>;

/// Everything the pipeline needs to know, resolved from [`crate::config::Config`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_root: PathBuf,
    pub command: String,
    pub leading_args: Vec<String>,
    pub process_timeout: Duration,
    pub max_upload_size: usize,
    pub max_concurrent_jobs: usize,
    pub capture_limit: usize,
    pub delimiter: u8,
    pub row_policy: RowPolicy,
}

/// Runs upload jobs: persist the upload, run the external command, decode its output
///
/// Shared by all request handlers. At most `max_concurrent_jobs` external
/// processes run at a time; further jobs wait as `Pending`.
pub struct UploadPipeline {
    work_root: PathBuf,
    max_upload_size: usize,
    max_concurrent_jobs: usize,
    runner: ProcessRunner,
    decoder: TableDecoder,
    permits: Arc<Semaphore>,
}

impl UploadPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        let runner = ProcessRunner::new(
            settings.command,
            settings.leading_args,
            settings.process_timeout,
            settings.capture_limit,
        );
        Self {
            work_root: settings.work_root,
            max_upload_size: settings.max_upload_size,
            max_concurrent_jobs: settings.max_concurrent_jobs,
            runner,
            decoder: TableDecoder::new(settings.delimiter, settings.row_policy),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
        }
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }

    /// Number of external processes currently holding a slot.
    pub fn active_jobs(&self) -> usize {
        self.max_concurrent_jobs
            .saturating_sub(self.permits.available_permits())
    }

    /// Create a pending job with its own workspace.
    pub fn begin_job(&self) -> Result<UploadJob, PipelineError> {
        UploadJob::create(&self.work_root).map_err(|e| {
            error!("Failed to create job workspace: {:?}", e);
            PipelineError::new(ErrorKind::WorkspaceUnavailable)
        })
    }

    /// Receive one upload and run it through the whole pipeline.
    pub async fn process_upload<S, B, E>(&self, chunks: S) -> PipelineResult
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut job = self.begin_job()?;
        info!("Job {}: receiving upload", job.id());

        if let Err(e) = job.receive_input(chunks, self.max_upload_size).await {
            job.conclude();
            return Err(e);
        }
        self.run_job(job).await
    }

    /// Run a job whose input has been received, then remove its workspace
    ///
    /// # Returns
    /// - `Ok(rows)` - process exited 0, output present and decoded
    /// - `Err(PipelineError)` - the first failure; see [`ErrorKind`]
    pub async fn run_job(&self, mut job: UploadJob) -> PipelineResult {
        let result = self.execute(&mut job).await;

        match &result {
            Ok(rows) => info!(
                "Job {}: succeeded with {} rows from {} uploaded bytes",
                job.id(),
                rows.len(),
                job.received_bytes()
            ),
            Err(e) => warn!("Job {}: failed: {}", job.id(), e.kind()),
        }

        job.conclude();
        result
    }

    async fn execute(&self, job: &mut UploadJob) -> PipelineResult {
        let permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Job {}: concurrency limiter closed: {:?}", job.id(), e);
                return Err(job.fail(ErrorKind::ProcessLaunchFailed));
            }
        };
        job.advance(JobStatus::Running);
        info!("Job {}: running '{}'", job.id(), self.runner.program());

        let outcome = self.runner.run(job.input_path(), job.output_path()).await;
        drop(permit);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(RunError::TimedOut {
                after,
                stdout,
                stderr,
            }) => {
                warn!("Job {}: process timed out after {:?}", job.id(), after);
                let diagnostics = job.redact(reported_text(&stdout, &stderr));
                return Err(job
                    .fail(ErrorKind::ProcessTimedOut)
                    .with_diagnostics(&diagnostics));
            }
            Err(e) => {
                error!("Job {}: {}", job.id(), e);
                return Err(job.fail(ErrorKind::ProcessLaunchFailed));
            }
        };

        if !outcome.stdout.trim().is_empty() {
            debug!("Job {}: stdout: {}", job.id(), outcome.stdout.trim_end());
        }
        if !outcome.stderr.trim().is_empty() {
            debug!("Job {}: stderr: {}", job.id(), outcome.stderr.trim_end());
        }

        if !outcome.success() {
            warn!(
                "Job {}: process exited with code {}",
                job.id(),
                outcome.exit_code
            );
            let diagnostics = job.redact(reported_text(&outcome.stdout, &outcome.stderr));
            return Err(job
                .fail(ErrorKind::ProcessExitedNonZero {
                    code: outcome.exit_code,
                })
                .with_diagnostics(&diagnostics));
        }

        let has_output = match tokio::fs::metadata(job.output_path()).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        };
        if !has_output {
            warn!("Job {}: process exited 0 but left no output", job.id());
            return Err(job.fail(ErrorKind::OutputMissingOrEmpty));
        }

        let file = match tokio::fs::File::open(job.output_path()).await {
            Ok(file) => file,
            Err(e) => {
                error!("Job {}: cannot open output file: {:?}", job.id(), e);
                return Err(job.fail(ErrorKind::OutputMissingOrEmpty));
            }
        };

        match self.decoder.decode(file).await {
            Ok(rows) => {
                job.advance(JobStatus::Succeeded);
                Ok(rows)
            }
            Err(e) => {
                warn!("Job {}: output could not be decoded: {}", job.id(), e);
                let reason = job.redact(&e.to_string());
                Err(job.fail(ErrorKind::DecodeFailed { reason }))
            }
        }
    }
}

/// stderr, or stdout when stderr is silent; scripts often report failures on stdout.
fn reported_text<'a>(stdout: &'a str, stderr: &'a str) -> &'a str {
    if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    }
}
