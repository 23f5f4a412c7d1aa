use crate::config::ExecutorConfig;
use crate::errors::{RatchetError, RatchetResult};
use crate::tools::base::{ResultMetadata, Tool, ToolRequest, ToolResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One unit of work travelling from `submit` to a worker.
struct Job {
    id: String,
    tool: Arc<dyn Tool>,
    request: ToolRequest,
}

type ChannelMap = Arc<Mutex<HashMap<String, oneshot::Sender<ToolResult>>>>;

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub workers: usize,
    pub queued: usize,
    pub active: usize,
    pub running: bool,
}

struct PoolState {
    job_tx: Option<mpsc::Sender<Job>>,
    shutdown: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

/// Fixed-size worker pool with per-job result channels.
///
/// Jobs flow through a bounded queue to a dispatcher that fans them to the
/// first worker able to take one without blocking (falling back to a
/// blocking hand-off so delivery is eventual). Workers run the tool inside
/// panic isolation and deliver on a single-shot channel removed from the
/// registration map first, so delivery happens exactly once even if the
/// caller has gone away.
pub struct ExecutorPool {
    workers: usize,
    submit_timeout: Duration,
    state: Mutex<PoolState>,
    channels: ChannelMap,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    running: AtomicBool,
}

impl ExecutorPool {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            workers: config.worker_count(),
            submit_timeout: config.submit_timeout(),
            state: Mutex::new(PoolState {
                job_tx: None,
                shutdown: None,
                handles: Vec::new(),
            }),
            channels: Arc::new(Mutex::new(HashMap::new())),
            queued: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the workers and dispatcher. Errors when already running.
    pub fn start(&self) -> RatchetResult<()> {
        let mut state = self.lock_state();
        if state.job_tx.is_some() {
            return Err(RatchetError::Pool("executor pool already running".into()));
        }

        let shutdown = CancellationToken::new();
        let (job_tx, job_rx) = mpsc::channel::<Job>(2 * self.workers);
        let mut handles = Vec::with_capacity(self.workers + 1);
        let mut worker_txs = Vec::with_capacity(self.workers);

        for index in 0..self.workers {
            let (tx, rx) = mpsc::channel::<Job>(1);
            worker_txs.push(tx);
            handles.push(tokio::spawn(worker_loop(
                index,
                rx,
                shutdown.child_token(),
                Arc::clone(&self.channels),
                Arc::clone(&self.active),
            )));
        }
        handles.push(tokio::spawn(dispatch_loop(
            job_rx,
            worker_txs,
            shutdown.child_token(),
            Arc::clone(&self.queued),
        )));

        state.job_tx = Some(job_tx);
        state.shutdown = Some(shutdown);
        state.handles = handles;
        self.running.store(true, Ordering::Release);
        info!("executor pool started with {} workers", self.workers);
        Ok(())
    }

    /// Stop workers and dispatcher, close every outstanding result channel,
    /// and clear the registration map. Errors when not running.
    pub async fn stop(&self) -> RatchetResult<()> {
        let (shutdown, handles) = {
            let mut state = self.lock_state();
            if state.job_tx.is_none() {
                return Err(RatchetError::Pool("executor pool is not running".into()));
            }
            state.job_tx = None;
            (state.shutdown.take(), std::mem::take(&mut state.handles))
        };
        self.running.store(false, Ordering::Release);
        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }
        for handle in handles {
            let _ = handle.await;
        }
        // Dropping the senders closes the channels on the caller side.
        let outstanding: Vec<_> = self.lock_channels().drain().collect();
        if !outstanding.is_empty() {
            debug!(
                "executor pool dropped {} outstanding result channels on stop",
                outstanding.len()
            );
        }
        self.queued.store(0, Ordering::Release);
        self.active.store(0, Ordering::Release);
        info!("executor pool stopped");
        Ok(())
    }

    /// Enqueue a job. Blocks up to the configured submit timeout when the
    /// queue is full, then fails with `QueueFull` after removing the
    /// registered channel.
    pub async fn submit(
        &self,
        id: impl Into<String>,
        tool: Arc<dyn Tool>,
        request: ToolRequest,
    ) -> RatchetResult<oneshot::Receiver<ToolResult>> {
        let id = id.into();
        if !self.running.load(Ordering::Acquire) {
            return Err(RatchetError::Pool("executor pool is not running".into()));
        }
        let job_tx = self
            .lock_state()
            .job_tx
            .clone()
            .ok_or_else(|| RatchetError::Pool("executor pool is not running".into()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut channels = self.lock_channels();
            if channels.contains_key(&id) {
                return Err(RatchetError::Validation(format!(
                    "job id '{}' already in flight",
                    id
                )));
            }
            channels.insert(id.clone(), tx);
        }

        self.queued.fetch_add(1, Ordering::AcqRel);
        let job = Job {
            id: id.clone(),
            tool,
            request,
        };
        match tokio::time::timeout(self.submit_timeout, job_tx.send(job)).await {
            Ok(Ok(())) => Ok(rx),
            _ => {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                self.lock_channels().remove(&id);
                Err(RatchetError::QueueFull)
            }
        }
    }

    pub fn get_stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            queued: self.queued.load(Ordering::Acquire),
            active: self.active.load(Ordering::Acquire),
            running: self.running.load(Ordering::Acquire),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_channels(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ToolResult>>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Fan jobs to the first worker that accepts without blocking; when all are
/// busy, block-send on the first worker so delivery stays eventual.
async fn dispatch_loop(
    mut job_rx: mpsc::Receiver<Job>,
    worker_txs: Vec<mpsc::Sender<Job>>,
    shutdown: CancellationToken,
    queued: Arc<AtomicUsize>,
) {
    loop {
        let job = tokio::select! {
            () = shutdown.cancelled() => break,
            received = job_rx.recv() => match received {
                Some(job) => job,
                None => break,
            },
        };
        queued.fetch_sub(1, Ordering::AcqRel);

        let mut pending = Some(job);
        for tx in &worker_txs {
            match tx.try_send(pending.take().expect("job taken twice")) {
                Ok(()) => break,
                Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                    pending = Some(job);
                }
            }
        }
        if let Some(job) = pending {
            tokio::select! {
                () = shutdown.cancelled() => break,
                sent = worker_txs[0].send(job) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("executor pool dispatcher stopped");
}

async fn worker_loop(
    index: usize,
    mut rx: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
    channels: ChannelMap,
    active: Arc<AtomicUsize>,
) {
    loop {
        let job = tokio::select! {
            () = shutdown.cancelled() => break,
            received = rx.recv() => match received {
                Some(job) => job,
                None => break,
            },
        };
        active.fetch_add(1, Ordering::AcqRel);
        let result = run_job(&job).await;
        deliver(&channels, &job.id, result);
        active.fetch_sub(1, Ordering::AcqRel);
    }
    debug!("executor pool worker {} stopped", index);
}

/// Run one job with panic isolation and stamp its metadata.
async fn run_job(job: &Job) -> ToolResult {
    let start_wall = Utc::now();
    let started = Instant::now();

    let tool = Arc::clone(&job.tool);
    let params = job.request.parameters.clone();
    let ctx = job.request.context.clone();
    let handle = tokio::spawn(async move { tool.execute(params, &ctx).await });

    let mut result = match handle.await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => ToolResult::error(err.to_string()),
        Err(join_err) => {
            if join_err.is_panic() {
                // into_panic consumes the JoinError, so extract in one step.
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| payload.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown cause");
                error!("tool '{}' panicked: {}", job.request.name, message);
                ToolResult::error(format!("tool execution panicked: {}", message))
            } else {
                ToolResult::error("tool execution cancelled".to_string())
            }
        }
    };

    let execution_time = started.elapsed();
    result.metadata = ResultMetadata {
        tool_name: job.request.name.clone(),
        start_time: start_wall,
        end_time: start_wall
            + chrono::Duration::from_std(execution_time).unwrap_or_else(|_| chrono::Duration::zero()),
        execution_time,
        parameters: job.request.parameters.clone(),
    };
    result
}

/// Deliver exactly once: removing the map entry first means a second path
/// cannot find a sender to deliver on.
fn deliver(channels: &ChannelMap, id: &str, result: ToolResult) {
    let sender = match channels.lock() {
        Ok(mut guard) => guard.remove(id),
        Err(poisoned) => poisoned.into_inner().remove(id),
    };
    match sender {
        Some(tx) => {
            if tx.send(result).is_err() {
                debug!("result for job '{}' dropped: caller went away", id);
            }
        }
        None => debug!("no result channel registered for job '{}'", id),
    }
}
