use crate::tools::base::ToolResult;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Wildcard subscriber key: receives updates for every tracker.
const ALL: &str = "*";

/// Lifecycle of a tracked execution (a whole batch or one tool within it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Live state of one tool inside a tracker.
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub tool_name: String,
    pub start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub message: String,
}

/// Progress state for one execution context.
///
/// A tool id lives in `active_tools` or `completed_results`/`errors`, never
/// both; `completed_tools` only grows; once terminal, the status is stable.
/// A tracker expecting zero tools is born complete.
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub total_tools: usize,
    pub completed_tools: usize,
    pub active_tools: HashMap<String, ToolProgress>,
    pub completed_results: HashMap<String, ToolResult>,
    pub errors: HashMap<String, String>,
}

impl ExecutionTracker {
    fn new(id: impl Into<String>, total_tools: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            start_time: now,
            last_update: now,
            status: if total_tools == 0 {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Pending
            },
            total_tools,
            completed_tools: 0,
            active_tools: HashMap::new(),
            completed_results: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn fraction_complete(&self) -> f64 {
        if self.total_tools == 0 {
            1.0
        } else {
            self.completed_tools as f64 / self.total_tools as f64
        }
    }
}

/// One broadcast snapshot delivered to subscribers.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub tracker_id: String,
    pub status: ExecutionStatus,
    pub total_tools: usize,
    pub completed_tools: usize,
    pub active_tools: usize,
    pub failed_tools: usize,
    pub fraction_complete: f64,
    pub elapsed: Duration,
    /// `elapsed · (1−p)/p`; absent at the endpoints.
    pub eta: Option<Duration>,
    pub tools: Vec<ToolProgress>,
}

type Subscriber = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Central progress fan-out: a tracker table and subscribers per tracker id
/// (plus a wildcard). A periodic broadcaster snapshots the table under a
/// read lock and delivers each update on its own task, so one slow
/// subscriber never stalls the broadcaster or its peers.
pub struct ProgressManager {
    trackers: RwLock<HashMap<String, ExecutionTracker>>,
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    interval: Duration,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl ProgressManager {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            trackers: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            interval,
            broadcaster: Mutex::new(None),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Create (or replace) a tracker expecting `total_tools` completions.
    pub fn create_tracker(&self, id: &str, total_tools: usize) {
        let mut trackers = self.write_trackers();
        trackers.insert(id.to_string(), ExecutionTracker::new(id, total_tools));
    }

    pub fn remove_tracker(&self, id: &str) {
        self.write_trackers().remove(id);
    }

    pub fn snapshot(&self, id: &str) -> Option<ExecutionTracker> {
        self.read_trackers().get(id).cloned()
    }

    /// Subscribe to one tracker id, or to all of them with `"*"`.
    pub fn subscribe(&self, id: &str, callback: impl Fn(ProgressUpdate) + Send + Sync + 'static) {
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers
            .entry(id.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Upsert one tool's live state. The first active tool flips a pending
    /// tracker to running.
    pub fn update_tool_status(
        &self,
        tracker_id: &str,
        tool_id: &str,
        tool_name: &str,
        status: ExecutionStatus,
        progress: f64,
        message: &str,
    ) {
        let mut trackers = self.write_trackers();
        let Some(tracker) = trackers.get_mut(tracker_id) else {
            return;
        };
        let now = Utc::now();
        tracker
            .active_tools
            .entry(tool_id.to_string())
            .and_modify(|tool| {
                tool.status = status;
                tool.progress = progress.clamp(0.0, 1.0);
                tool.message = message.to_string();
            })
            .or_insert_with(|| ToolProgress {
                tool_name: tool_name.to_string(),
                start_time: now,
                status,
                progress: progress.clamp(0.0, 1.0),
                message: message.to_string(),
            });
        if tracker.status == ExecutionStatus::Pending {
            tracker.status = ExecutionStatus::Running;
        }
        tracker.last_update = now;
    }

    /// Move one tool from active to completed, then flip the tracker to a
    /// terminal status when every expected tool has finished.
    pub fn complete_tool_execution(
        &self,
        tracker_id: &str,
        tool_id: &str,
        result: Option<ToolResult>,
        error: Option<String>,
    ) {
        let mut trackers = self.write_trackers();
        let Some(tracker) = trackers.get_mut(tracker_id) else {
            return;
        };
        if tracker.is_complete() {
            // Terminal trackers are stable; a late completion cannot
            // reopen one.
            return;
        }
        tracker.active_tools.remove(tool_id);
        if let Some(result) = result {
            tracker
                .completed_results
                .insert(tool_id.to_string(), result);
        }
        if let Some(error) = error {
            tracker.errors.insert(tool_id.to_string(), error);
        }
        tracker.completed_tools += 1;
        tracker.last_update = Utc::now();
        if tracker.completed_tools >= tracker.total_tools {
            tracker.status = if tracker.errors.is_empty() {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
            debug!(
                "tracker '{}' terminal: {:?} ({} tools)",
                tracker_id, tracker.status, tracker.completed_tools
            );
        }
    }

    /// Mark a tracker cancelled. Terminal and stable.
    pub fn cancel_tracker(&self, tracker_id: &str) {
        let mut trackers = self.write_trackers();
        if let Some(tracker) = trackers.get_mut(tracker_id)
            && !tracker.is_complete()
        {
            tracker.status = ExecutionStatus::Cancelled;
            tracker.last_update = Utc::now();
        }
    }

    /// Run `work` for one tool with started/terminal lifecycle events
    /// emitted around it.
    pub async fn track<F>(
        &self,
        tracker_id: &str,
        tool_id: &str,
        tool_name: &str,
        work: F,
    ) -> ToolResult
    where
        F: std::future::Future<Output = ToolResult>,
    {
        self.update_tool_status(
            tracker_id,
            tool_id,
            tool_name,
            ExecutionStatus::Running,
            0.0,
            "started",
        );
        let result = work.await;
        let error = (!result.success).then(|| result.error.clone());
        self.complete_tool_execution(tracker_id, tool_id, Some(result.clone()), error);
        result
    }

    /// Spawn the periodic broadcaster. No-op when already running or closed.
    pub fn start(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = match self.broadcaster.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.interval;
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => manager.broadcast(),
                }
            }
            debug!("progress broadcaster stopped");
        }));
    }

    /// Stop the broadcaster. Only the first call does any work.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let handle = match self.broadcaster.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One broadcast round: copy the table under the read lock, build the
    /// updates outside it, deliver each on its own task.
    fn broadcast(&self) {
        let snapshots: Vec<ExecutionTracker> =
            self.read_trackers().values().cloned().collect();
        if snapshots.is_empty() {
            return;
        }
        for tracker in snapshots {
            let update = Self::build_update(&tracker);
            let targets: Vec<Subscriber> = {
                let subscribers = match self.subscribers.read() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                subscribers
                    .get(&tracker.id)
                    .into_iter()
                    .chain(subscribers.get(ALL))
                    .flatten()
                    .cloned()
                    .collect()
            };
            for subscriber in targets {
                let update = update.clone();
                tokio::spawn(async move { subscriber(update) });
            }
        }
    }

    fn build_update(tracker: &ExecutionTracker) -> ProgressUpdate {
        let elapsed = (Utc::now() - tracker.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let p = tracker.fraction_complete();
        let eta = if p > 0.0 && p < 1.0 {
            Some(elapsed.mul_f64((1.0 - p) / p))
        } else {
            None
        };
        ProgressUpdate {
            tracker_id: tracker.id.clone(),
            status: tracker.status,
            total_tools: tracker.total_tools,
            completed_tools: tracker.completed_tools,
            active_tools: tracker.active_tools.len(),
            failed_tools: tracker.errors.len(),
            fraction_complete: p,
            elapsed,
            eta,
            tools: tracker.active_tools.values().cloned().collect(),
        }
    }

    fn read_trackers(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ExecutionTracker>> {
        match self.trackers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_trackers(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ExecutionTracker>> {
        match self.trackers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
