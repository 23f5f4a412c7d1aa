use crate::executor::batch::BatchResult;
use crate::tools::base::ToolResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Wildcard subscriber key: fires for every id.
const ALL: &str = "*";

type Callback = Arc<dyn Fn(String, ToolResult) + Send + Sync>;

/// Ad-hoc result fan-in, independent of the scheduler.
///
/// `add_result` merges one outcome, fires id-specific and wildcard
/// callbacks on their own tasks, and closes the done signal exactly once
/// when every expected result has arrived. `wait` always hands back the
/// partial batch result, however it unblocks.
pub struct ResultAggregator {
    expected: usize,
    timeout: Option<Duration>,
    state: Mutex<BatchResult>,
    callbacks: Mutex<HashMap<String, Vec<Callback>>>,
    done: CancellationToken,
}

impl ResultAggregator {
    pub fn new(expected: usize) -> Self {
        let aggregator = Self {
            expected,
            timeout: None,
            state: Mutex::new(BatchResult::pending(expected)),
            callbacks: Mutex::new(HashMap::new()),
            done: CancellationToken::new(),
        };
        if expected == 0 {
            aggregator.done.cancel();
        }
        aggregator
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register a callback for one id, or for every id with `"*"`.
    /// Callbacks run on their own tasks; a slow one stalls nothing.
    pub fn on_result(&self, id: &str, callback: impl Fn(String, ToolResult) + Send + Sync + 'static) {
        let mut callbacks = match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        callbacks
            .entry(id.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Merge one outcome. A non-empty `error` lands in the error map; a
    /// result is recorded either way when present.
    pub fn add_result(&self, id: &str, result: Option<ToolResult>, error: Option<String>) {
        let completed = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(result) = &result {
                state.results.insert(id.to_string(), result.clone());
            }
            if let Some(error) = error {
                state.errors.insert(id.to_string(), error);
            }
            // Completion counts distinct settled ids, not map sizes: an id
            // can be in both maps.
            let mut settled: std::collections::HashSet<&String> = state.results.keys().collect();
            settled.extend(state.errors.keys());
            settled.len()
        };

        self.fire_callbacks(id, result);

        if completed >= self.expected && !self.done.is_cancelled() {
            debug!("aggregator complete: {}/{} results", completed, self.expected);
            self.done.cancel();
        }
    }

    /// Block until done, the configured timeout, or `cancel`. Returns the
    /// (possibly partial) batch result in every case.
    pub async fn wait(&self, cancel: &CancellationToken) -> BatchResult {
        let timeout = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        let cancelled = tokio::select! {
            () = self.done.cancelled() => false,
            () = cancel.cancelled() => true,
            () = timeout => true,
        };
        self.snapshot(cancelled)
    }

    /// Whether every expected result has arrived.
    pub fn is_complete(&self) -> bool {
        self.done.is_cancelled()
    }

    fn snapshot(&self, cancelled: bool) -> BatchResult {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.finalize(cancelled);
        state.clone()
    }

    fn fire_callbacks(&self, id: &str, result: Option<ToolResult>) {
        let result = result.unwrap_or_else(|| ToolResult::error("no result"));
        let targets: Vec<Callback> = {
            let callbacks = match self.callbacks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            callbacks
                .get(id)
                .into_iter()
                .chain(callbacks.get(ALL))
                .flatten()
                .cloned()
                .collect()
        };
        for callback in targets {
            let id = id.to_string();
            let result = result.clone();
            tokio::spawn(async move { callback(id, result) });
        }
    }
}
