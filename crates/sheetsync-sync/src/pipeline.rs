//! Offloaded transform pipeline
//!
//! Transforms run on one long-lived OS thread so that large tables never
//! block the async runtime. The pipeline owns the worker and a registry of
//! pending jobs keyed by [`JobId`]:
//!
//! ```text
//! run() ──WorkerMessage::Transform──▶ worker thread
//!   ▲                                      │
//!   │ oneshot                              │ WorkerReply::{Progress, Complete, Error}
//!   │                                      ▼
//!   └──────────── jobs (DashMap) ◀── reply dispatcher task
//! ```
//!
//! A job that does not settle within the job timeout is removed from the
//! registry; if the caller supplied a fallback it runs inline on the retained
//! input. When the worker thread dies every job it owned is rejected and the
//! next `run` spawns a fresh worker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use sheetsync_core::config::TransformConfig;
use sheetsync_core::domain::{DomainRow, JobId, RawRow};
use sheetsync_core::ports::{TransformInput, TransformMeta, Transformer};
use sheetsync_telemetry::MetricsRegistry;

use crate::transformers::TransformerRegistry;
use crate::TransformError;

/// Caller-supplied percent-complete callback
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

type JobResult = Result<Vec<DomainRow>, TransformError>;

/// Default per-job timeout
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60);

const WORKER_THREAD_NAME: &str = "sheetsync-transform";

// ============================================================================
// Requests and worker protocol
// ============================================================================

/// One transform to run
#[derive(Debug, Clone, Default)]
pub struct TransformRequest {
    pub transformer_id: String,
    pub rows: Vec<RawRow>,
    pub meta: TransformMeta,
    pub extra: Map<String, Value>,
}

impl TransformRequest {
    pub fn new(transformer_id: impl Into<String>, rows: Vec<RawRow>, meta: TransformMeta) -> Self {
        Self {
            transformer_id: transformer_id.into(),
            rows,
            meta,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    fn into_parts(self) -> (String, TransformInput) {
        (
            self.transformer_id,
            TransformInput {
                rows: self.rows,
                meta: self.meta,
                extra: self.extra,
            },
        )
    }
}

#[derive(Debug)]
enum WorkerMessage {
    Transform {
        job_id: JobId,
        transformer_id: String,
        data: Vec<RawRow>,
        meta: TransformMeta,
        extra: Map<String, Value>,
    },
}

#[derive(Debug)]
enum WorkerReply {
    Progress { job_id: JobId, percent: u8 },
    Complete { job_id: JobId, rows: Vec<DomainRow> },
    Error { job_id: JobId, message: String },
}

struct PendingJob {
    transformer_id: String,
    reply: oneshot::Sender<JobResult>,
    progress: Option<ProgressFn>,
    generation: u64,
}

#[derive(Clone)]
struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    generation: u64,
}

type WorkerSlot = Arc<Mutex<Option<WorkerHandle>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionPath {
    Worker,
    Inline,
}

impl ExecutionPath {
    fn as_str(self) -> &'static str {
        match self {
            ExecutionPath::Worker => "worker",
            ExecutionPath::Inline => "inline",
        }
    }
}

// ============================================================================
// TransformPipeline
// ============================================================================

/// Runs transformers on a shared worker thread with inline fallback
pub struct TransformPipeline {
    registry: TransformerRegistry,
    worker_enabled: bool,
    job_timeout: Duration,
    jobs: Arc<DashMap<JobId, PendingJob>>,
    worker: WorkerSlot,
    generation: AtomicU64,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl TransformPipeline {
    pub fn new(registry: TransformerRegistry) -> Self {
        Self {
            registry,
            worker_enabled: true,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            jobs: Arc::new(DashMap::new()),
            worker: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn from_config(config: &TransformConfig, registry: TransformerRegistry) -> Self {
        Self::new(registry)
            .with_worker_enabled(config.worker_enabled)
            .with_job_timeout(Duration::from_secs(config.job_timeout_secs))
    }

    pub fn with_worker_enabled(mut self, enabled: bool) -> Self {
        self.worker_enabled = enabled;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    /// Number of jobs waiting for a worker reply
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// True while a live worker thread is attached
    pub fn has_worker(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|handle| !handle.tx.is_closed())
    }

    /// Run the registered transformer for `request.transformer_id`
    ///
    /// The registered transformer doubles as the inline fallback.
    ///
    /// # Errors
    ///
    /// `UnknownTransformer` if nothing is registered under the id, otherwise
    /// whatever [`run`](Self::run) returns.
    pub async fn transform(
        &self,
        request: TransformRequest,
        progress: Option<ProgressFn>,
    ) -> Result<Vec<DomainRow>, TransformError> {
        let Some(fallback) = self.registry.get(&request.transformer_id) else {
            return Err(TransformError::UnknownTransformer(request.transformer_id));
        };
        self.run(request, progress, Some(fallback)).await
    }

    /// Run `request` on the worker, or inline through `fallback`
    ///
    /// The fallback runs on the calling task when the worker is disabled,
    /// cannot be started, does not know the transformer, or the job times out.
    ///
    /// # Errors
    ///
    /// - `NoFallback` when the worker cannot take the job and no fallback was given
    /// - `Timeout` when the job expired and no fallback was given
    /// - `Failed` when the transformer rejected its input
    /// - `WorkerCrashed` when the worker died with the job registered
    pub async fn run(
        &self,
        request: TransformRequest,
        progress: Option<ProgressFn>,
        fallback: Option<Arc<dyn Transformer>>,
    ) -> Result<Vec<DomainRow>, TransformError> {
        let started = Instant::now();
        let (path, result) = self.dispatch(request, progress, fallback).await;

        if let Some(metrics) = &self.metrics {
            let status = if result.is_ok() { "success" } else { "failure" };
            metrics.record_transform(path.as_str(), status);
            metrics.observe_transform_duration(path.as_str(), started.elapsed().as_secs_f64());
        }
        result
    }

    async fn dispatch(
        &self,
        request: TransformRequest,
        progress: Option<ProgressFn>,
        fallback: Option<Arc<dyn Transformer>>,
    ) -> (ExecutionPath, JobResult) {
        let (transformer_id, input) = request.into_parts();

        if !self.worker_enabled {
            debug!(transformer = %transformer_id, "Worker disabled, transforming inline");
            return self.inline(&transformer_id, &input, progress.as_ref(), fallback.as_deref());
        }
        if !self.registry.contains(&transformer_id) {
            debug!(transformer = %transformer_id, "Worker has no such transformer, transforming inline");
            return self.inline(&transformer_id, &input, progress.as_ref(), fallback.as_deref());
        }
        let handle = match self.ensure_worker() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Transform worker could not be started");
                return self.inline(&transformer_id, &input, progress.as_ref(), fallback.as_deref());
            }
        };

        let job_id = JobId::new();
        let retained = fallback.as_ref().map(|_| input.clone());
        let (reply_tx, reply_rx) = oneshot::channel();
        self.jobs.insert(
            job_id,
            PendingJob {
                transformer_id: transformer_id.clone(),
                reply: reply_tx,
                progress: progress.clone(),
                generation: handle.generation,
            },
        );

        let message = WorkerMessage::Transform {
            job_id,
            transformer_id: transformer_id.clone(),
            data: input.rows,
            meta: input.meta,
            extra: input.extra,
        };
        if let Err(mpsc::error::SendError(WorkerMessage::Transform {
            data, meta, extra, ..
        })) = handle.tx.send(message)
        {
            warn!(job_id = %job_id, "Transform worker is gone, transforming inline");
            self.jobs.remove(&job_id);
            self.discard_worker(handle.generation);
            let input = TransformInput {
                rows: data,
                meta,
                extra,
            };
            return self.inline(&transformer_id, &input, progress.as_ref(), fallback.as_deref());
        }
        debug!(job_id = %job_id, transformer = %transformer_id, "Transform job sent to worker");

        match tokio::time::timeout(self.job_timeout, reply_rx).await {
            Ok(Ok(result)) => (ExecutionPath::Worker, result),
            Ok(Err(_)) => (
                ExecutionPath::Worker,
                Err(TransformError::WorkerCrashed(
                    "job dropped without a reply".to_string(),
                )),
            ),
            Err(_) => {
                self.jobs.remove(&job_id);
                warn!(
                    job_id = %job_id,
                    transformer = %transformer_id,
                    timeout = ?self.job_timeout,
                    has_fallback = retained.is_some(),
                    "Transform job timed out"
                );
                match (fallback, retained) {
                    (Some(fallback), Some(input)) => {
                        self.inline(&transformer_id, &input, progress.as_ref(), Some(&*fallback))
                    }
                    _ => (
                        ExecutionPath::Worker,
                        Err(TransformError::Timeout {
                            transformer: transformer_id,
                            after: self.job_timeout,
                        }),
                    ),
                }
            }
        }
    }

    fn inline(
        &self,
        transformer_id: &str,
        input: &TransformInput,
        progress: Option<&ProgressFn>,
        fallback: Option<&dyn Transformer>,
    ) -> (ExecutionPath, JobResult) {
        let Some(fallback) = fallback else {
            return (
                ExecutionPath::Inline,
                Err(TransformError::NoFallback(transformer_id.to_string())),
            );
        };
        let mut report = |percent: u8| {
            if let Some(progress) = progress {
                progress(percent);
            }
        };
        let result = fallback
            .transform(input, &mut report)
            .map_err(|e| TransformError::Failed {
                transformer: transformer_id.to_string(),
                message: e.0,
            });
        (ExecutionPath::Inline, result)
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live worker, spawning one if there is none
    fn ensure_worker(&self) -> std::io::Result<WorkerHandle> {
        let mut slot = self.lock_worker();
        if let Some(handle) = slot.as_ref() {
            if !handle.tx.is_closed() {
                return Ok(handle.clone());
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let registry = self.registry.clone();

        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker_loop(registry, rx, reply_tx))?;
        tokio::spawn(dispatch_replies(
            reply_rx,
            Arc::clone(&self.jobs),
            Arc::clone(&self.worker),
            generation,
        ));

        debug!(generation, "Transform worker started");
        let handle = WorkerHandle { tx, generation };
        *slot = Some(handle.clone());
        Ok(handle)
    }

    fn discard_worker(&self, generation: u64) {
        clear_slot(&self.worker, generation);
    }
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("registry", &self.registry)
            .field("worker_enabled", &self.worker_enabled)
            .field("job_timeout", &self.job_timeout)
            .field("pending_jobs", &self.jobs.len())
            .finish()
    }
}

fn clear_slot(slot: &WorkerSlot, generation: u64) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|h| h.generation == generation) {
        *slot = None;
    }
}

// ============================================================================
// Worker thread and reply dispatch
// ============================================================================

fn worker_loop(
    registry: TransformerRegistry,
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
    replies: mpsc::UnboundedSender<WorkerReply>,
) {
    while let Some(WorkerMessage::Transform {
        job_id,
        transformer_id,
        data,
        meta,
        extra,
    }) = rx.blocking_recv()
    {
        let Some(transformer) = registry.get(&transformer_id) else {
            let _ = replies.send(WorkerReply::Error {
                job_id,
                message: format!("unknown transformer '{transformer_id}'"),
            });
            continue;
        };

        let input = TransformInput {
            rows: data,
            meta,
            extra,
        };
        let mut report = |percent: u8| {
            let _ = replies.send(WorkerReply::Progress { job_id, percent });
        };
        let reply = match transformer.transform(&input, &mut report) {
            Ok(rows) => WorkerReply::Complete { job_id, rows },
            Err(e) => WorkerReply::Error {
                job_id,
                message: e.0,
            },
        };
        let _ = replies.send(reply);
    }
}

async fn dispatch_replies(
    mut replies: mpsc::UnboundedReceiver<WorkerReply>,
    jobs: Arc<DashMap<JobId, PendingJob>>,
    worker: WorkerSlot,
    generation: u64,
) {
    while let Some(reply) = replies.recv().await {
        match reply {
            WorkerReply::Progress { job_id, percent } => {
                let progress = jobs.get(&job_id).and_then(|job| job.progress.clone());
                if let Some(progress) = progress {
                    progress(percent);
                }
            }
            WorkerReply::Complete { job_id, rows } => {
                if let Some((_, job)) = jobs.remove(&job_id) {
                    let _ = job.reply.send(Ok(rows));
                }
            }
            WorkerReply::Error { job_id, message } => {
                if let Some((_, job)) = jobs.remove(&job_id) {
                    let _ = job.reply.send(Err(TransformError::Failed {
                        transformer: job.transformer_id,
                        message,
                    }));
                }
            }
        }
    }

    // Reply channel closed: the worker thread is gone
    let orphaned: Vec<JobId> = jobs
        .iter()
        .filter(|job| job.generation == generation)
        .map(|job| *job.key())
        .collect();
    clear_slot(&worker, generation);

    if orphaned.is_empty() {
        debug!(generation, "Transform worker stopped");
        return;
    }
    error!(
        generation,
        rejected = orphaned.len(),
        "Transform worker crashed, rejecting its pending jobs"
    );
    for job_id in orphaned {
        if let Some((_, job)) = jobs.remove(&job_id) {
            let _ = job.reply.send(Err(TransformError::WorkerCrashed(format!(
                "worker exited while running '{}'",
                job.transformer_id
            ))));
        }
    }
}
