//! Generation job queue
//!
//! Requests are queued on a channel and executed by worker tasks, one per
//! configured CUDA device, so each GPU runs at most one inference at a time
//! and HTTP handlers never wait on a child process themselves.
//!
//! Only jobs still in the `queued` state count toward the queue capacity; a
//! job cancelled while waiting frees its slot immediately, even though its
//! channel entry is discarded later by a worker. Finished records are kept
//! for polling up to the configured history size, oldest evicted first.
//!
//! Both front-door contracts go through the queue:
//! - [`JobQueue::submit`] returns as soon as the job is accepted
//! - [`JobQueue::submit_and_wait`] resolves when the worker finishes the job

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use yue_common::config::InferenceConfig;

use crate::params::GenerationRequest;
use crate::pipeline::{GenerationError, GenerationOutcome, GenerationPipeline, JobContext};
use crate::staging::StagingArea;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for a free worker
    Queued,
    /// Inference process running
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Pollable view of a job
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// CUDA device the job ran on
    pub device: Option<String>,
    pub output_dir: PathBuf,
    /// File name of the newest artifact, relative to `output_dir`
    pub artifact: Option<String>,
    pub file_count: Option<usize>,
    /// Human-readable status text
    pub status: String,
    pub error_code: Option<String>,
    pub command_line: Option<String>,
}

impl JobRecord {
    fn queued(job_id: Uuid, output_dir: PathBuf) -> Self {
        Self {
            job_id,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            device: None,
            output_dir,
            artifact: None,
            file_count: None,
            status: "Queued".to_string(),
            error_code: None,
            command_line: None,
        }
    }

    fn finish(&mut self, outcome: &Result<GenerationOutcome, GenerationError>) {
        self.finished_at = Some(Utc::now());
        match outcome {
            Ok(outcome) => {
                self.state = JobState::Succeeded;
                self.artifact = Some(outcome.artifact.file_name());
                self.file_count = Some(outcome.file_count);
                self.status = outcome.status_text();
                self.command_line = Some(outcome.command_line.clone());
            }
            Err(error) => {
                self.state = if error.is_cancelled() {
                    JobState::Cancelled
                } else {
                    JobState::Failed
                };
                self.status = error.status_text();
                self.error_code = Some(error.code().to_string());
                self.command_line = error.command_line().map(str::to_string);
            }
        }
    }
}

/// Result delivered to a waiting caller
#[derive(Debug)]
pub struct CompletedJob {
    pub record: JobRecord,
    pub outcome: Result<GenerationOutcome, GenerationError>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("generation queue is full ({0} jobs waiting)")]
    Full(usize),

    #[error("generation workers have shut down")]
    ShutDown,

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {0} has already finished")]
    AlreadyFinished(Uuid),

    #[error("job {0} was cancelled before it started")]
    CancelledBeforeStart(Uuid),
}

struct PendingJob {
    job_id: Uuid,
    request: GenerationRequest,
    cancel: CancellationToken,
    reply: Option<oneshot::Sender<CompletedJob>>,
    /// Uploaded prompt audio owned by this job; released when it ends
    uploads: Option<StagingArea>,
}

type Registry = Arc<RwLock<HashMap<Uuid, JobRecord>>>;
type Tokens = Arc<RwLock<HashMap<Uuid, CancellationToken>>>;

/// Handle for submitting and inspecting generation jobs
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<PendingJob>,
    /// Maximum number of jobs in the `queued` state
    capacity: usize,
    /// Finished records retained
    history: usize,
    pipeline: Arc<GenerationPipeline>,
    jobs: Registry,
    /// Cancellation tokens for jobs not yet finished
    tokens: Tokens,
    /// Last failure for diagnostics
    last_error: Arc<RwLock<Option<String>>>,
}

impl JobQueue {
    /// Start one worker per configured CUDA device
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: Arc<InferenceConfig>) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<PendingJob>();
        let rx = Arc::new(Mutex::new(rx));
        let pipeline = Arc::new(GenerationPipeline::new(config.clone()));

        let queue = Self {
            tx,
            capacity,
            history: config.job_history.max(1),
            pipeline,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            last_error: Arc::new(RwLock::new(None)),
        };

        for device in config.cuda_devices.iter().map(|d| d.trim()).filter(|d| !d.is_empty()) {
            let worker = Worker {
                device: device.to_string(),
                rx: rx.clone(),
                queue: queue.clone(),
            };
            tokio::spawn(worker.run());
        }

        queue
    }

    /// Queue a job and return its initial record (asynchronous contract)
    pub async fn submit(&self, request: GenerationRequest) -> Result<JobRecord, QueueError> {
        self.enqueue(request, None, None).await
    }

    /// Queue a job and wait until a worker finishes it (synchronous contract)
    pub async fn submit_and_wait(&self, request: GenerationRequest) -> Result<CompletedJob, QueueError> {
        self.wait_for(request, None).await
    }

    /// Like [`JobQueue::submit_and_wait`], handing over files the request
    /// refers to
    ///
    /// `uploads` is released when the job ends, whatever the outcome,
    /// including rejection by a full queue.
    pub async fn submit_and_wait_with_uploads(
        &self,
        request: GenerationRequest,
        uploads: StagingArea,
    ) -> Result<CompletedJob, QueueError> {
        self.wait_for(request, Some(uploads)).await
    }

    async fn wait_for(
        &self,
        request: GenerationRequest,
        uploads: Option<StagingArea>,
    ) -> Result<CompletedJob, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let record = self.enqueue(request, Some(reply_tx), uploads).await?;
        // The worker drops the sender without replying only when it skips a
        // job cancelled while still queued.
        reply_rx
            .await
            .map_err(|_| QueueError::CancelledBeforeStart(record.job_id))
    }

    pub async fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Cancel a queued or running job
    ///
    /// A running job's child process is killed; staged files are still released.
    pub async fn cancel(&self, job_id: Uuid) -> Result<JobRecord, QueueError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        if record.state.is_finished() {
            return Err(QueueError::AlreadyFinished(job_id));
        }

        if let Some(token) = self.tokens.read().await.get(&job_id) {
            token.cancel();
        }
        if record.state == JobState::Queued {
            record.state = JobState::Cancelled;
            record.finished_at = Some(Utc::now());
            record.status = "Cancelled before start".to_string();
            record.error_code = Some("CANCELLED".to_string());
        } else {
            record.status = "Cancellation requested".to_string();
        }

        tracing::info!(job_id = %job_id, state = ?record.state, "Job cancellation requested");
        let record = record.clone();
        evict_finished(&mut jobs, self.history);
        Ok(record)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    async fn enqueue(
        &self,
        request: GenerationRequest,
        reply: Option<oneshot::Sender<CompletedJob>>,
        uploads: Option<StagingArea>,
    ) -> Result<JobRecord, QueueError> {
        let job_id = Uuid::new_v4();
        let record = JobRecord::queued(job_id, self.pipeline.job_output_dir(job_id));
        let cancel = CancellationToken::new();

        {
            let mut jobs = self.jobs.write().await;
            let waiting = jobs
                .values()
                .filter(|r| r.state == JobState::Queued)
                .count();
            if waiting >= self.capacity {
                tracing::warn!(waiting, capacity = self.capacity, "Generation queue full");
                return Err(QueueError::Full(self.capacity));
            }
            jobs.insert(job_id, record.clone());
        }
        self.tokens.write().await.insert(job_id, cancel.clone());

        let pending = PendingJob {
            job_id,
            request,
            cancel,
            reply,
            uploads,
        };
        if self.tx.send(pending).is_err() {
            self.jobs.write().await.remove(&job_id);
            self.tokens.write().await.remove(&job_id);
            return Err(QueueError::ShutDown);
        }

        tracing::info!(job_id = %job_id, "Generation job queued");
        Ok(record)
    }
}

/// Remove the oldest finished records beyond `keep`
///
/// Queued and running jobs are never evicted. Returns how many records were
/// removed.
fn evict_finished(jobs: &mut HashMap<Uuid, JobRecord>, keep: usize) -> usize {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
        .values()
        .filter(|r| r.state.is_finished())
        .map(|r| (r.finished_at.unwrap_or(r.created_at), r.job_id))
        .collect();
    if finished.len() <= keep {
        return 0;
    }

    finished.sort();
    let excess = finished.len() - keep;
    for (_, job_id) in finished.into_iter().take(excess) {
        jobs.remove(&job_id);
    }
    tracing::debug!(evicted = excess, kept = keep, "Evicted finished job records");
    excess
}

/// Consumes jobs for one CUDA device
struct Worker {
    device: String,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<PendingJob>>>,
    queue: JobQueue,
}

impl Worker {
    async fn run(self) {
        tracing::info!(device = %self.device, "Generation worker started");
        loop {
            // Only one idle worker waits on the channel at a time
            let next = { self.rx.lock().await.recv().await };
            let Some(job) = next else { break };
            self.process(job).await;
        }
        tracing::info!(device = %self.device, "Generation worker stopped");
    }

    async fn process(&self, job: PendingJob) {
        let PendingJob {
            job_id,
            request,
            cancel,
            reply,
            uploads,
        } = job;

        let context = JobContext {
            job_id,
            cuda_idx: self.device.clone(),
            output_dir: self.queue.pipeline.job_output_dir(job_id),
        };

        // State check and transition happen under one lock so a concurrent
        // cancel sees either Queued or Running, never both
        let skipped = {
            let mut jobs = self.queue.jobs.write().await;
            match jobs.get_mut(&job_id) {
                Some(record) if record.state == JobState::Queued && !cancel.is_cancelled() => {
                    record.state = JobState::Running;
                    record.started_at = Some(Utc::now());
                    record.device = Some(self.device.clone());
                    record.status = "Running inference".to_string();
                    false
                }
                _ => true,
            }
        };
        if skipped {
            tracing::info!(job_id = %job_id, "Skipping job cancelled while queued");
            self.queue.tokens.write().await.remove(&job_id);
            return;
        }

        let outcome = self.queue.pipeline.run(&request, &context, &cancel).await;
        if let Some(mut uploads) = uploads {
            let released = uploads.release_all();
            tracing::debug!(job_id = %job_id, released, "Released uploaded prompt files");
        }

        if let Err(error) = &outcome {
            if !error.is_cancelled() {
                *self.queue.last_error.write().await = Some(error.to_string());
            }
            tracing::error!(
                job_id = %job_id,
                device = %self.device,
                code = error.code(),
                error = %error,
                "Generation job failed"
            );
        }

        let record = {
            let mut jobs = self.queue.jobs.write().await;
            let record = jobs
                .entry(job_id)
                .or_insert_with(|| JobRecord::queued(job_id, context.output_dir.clone()));
            record.finish(&outcome);
            let record = record.clone();
            evict_finished(&mut jobs, self.queue.history);
            record
        };
        self.queue.tokens.write().await.remove(&job_id);

        if let Some(reply) = reply {
            // Caller may have disconnected; the record stays pollable
            let _ = reply.send(CompletedJob { record, outcome });
        }
    }
}
