use crate::config::SchedulerConfig;
use crate::errors::{RatchetError, RatchetResult};
use crate::executor::batch::{BatchRequest, BatchResult};
use crate::executor::graph::{DependencyGraph, NodeStatus};
use crate::executor::pool::ExecutorPool;
use crate::progress::ExecutionStatus;
use crate::tools::base::{ExecutionContext, ToolRequest, ToolResult};
use crate::tools::registry::ToolRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One settled outcome travelling from a submission task to the consumer.
struct Outcome {
    id: String,
    result: Option<ToolResult>,
    error: Option<String>,
}

#[derive(Default)]
struct SharedState {
    results: HashMap<String, ToolResult>,
    errors: HashMap<String, String>,
    /// Settled ids — success or failure — that dependency waits poll.
    completed: HashSet<String>,
}

/// Drives a DAG of tool invocations through the executor pool under a
/// concurrency cap, with dependency waiting, cooperative cancellation, and
/// progress streaming.
pub struct BatchScheduler {
    registry: Arc<ToolRegistry>,
    pool: Arc<ExecutorPool>,
    config: SchedulerConfig,
}

impl BatchScheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        pool: Arc<ExecutorPool>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            config,
        }
    }

    /// Execute a whole batch.
    ///
    /// Returns `Err` only for validation failures, cycles, and context
    /// failures (cancellation or the batch timeout). Individual tool
    /// failures land in the result's `results`/`errors` maps. A failure
    /// observed while `stop_on_first_error` is set cancels the batch's
    /// derived context; that still returns `Ok` with the partial outcome.
    pub async fn execute(&self, request: BatchRequest) -> RatchetResult<BatchResult> {
        let ids = Self::assign_ids(&request)?;
        let mut graph = Self::build_graph(&request, &ids)?;
        let order = graph.topological_sort()?;

        let batch_id = uuid::Uuid::new_v4().to_string();
        let tools_count = request.tools.len();
        let mut batch = BatchResult::pending(tools_count);
        info!(
            "batch {} starting: {} tools, max_concurrent {}",
            batch_id, tools_count, self.config.max_concurrent
        );

        let progress = request.progress.clone();
        if let Some(progress) = &progress {
            progress.create_tracker(&batch_id, tools_count);
        }

        // Derived context: bounded by the request timeout clamped to the
        // configured ceiling, cancelled with the caller's context.
        let timeout = request
            .timeout
            .map(|t| t.min(self.config.default_timeout()))
            .unwrap_or_else(|| self.config.default_timeout());
        let cancel = request.context.cancellation.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let cancel = cancel.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(timeout) => {
                        timed_out.store(true, Ordering::Release);
                        cancel.cancel();
                    }
                }
            })
        };

        let shared = Arc::new(Mutex::new(SharedState::default()));
        let (out_tx, out_rx) = mpsc::channel::<Outcome>(tools_count.max(1));
        let consumer = self.spawn_consumer(
            out_rx,
            Arc::clone(&shared),
            request.options.stop_on_first_error,
            cancel.clone(),
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::with_capacity(tools_count);
        let mut aborted = false;

        let requests: HashMap<&str, &ToolRequest> = ids
            .iter()
            .map(String::as_str)
            .zip(request.tools.iter())
            .collect();

        'submit: for id in &order {
            let deps: Vec<String> = graph
                .node(id)
                .map(|node| node.dependencies.iter().cloned().collect())
                .unwrap_or_default();

            // Poll the completion set until every declared dependency has
            // settled (successfully or not — dependents run anyway).
            loop {
                if cancel.is_cancelled() {
                    aborted = true;
                    break 'submit;
                }
                let ready = {
                    let state = lock(&shared);
                    deps.iter().all(|dep| state.completed.contains(dep))
                };
                if ready {
                    break;
                }
                tokio::select! {
                    () = cancel.cancelled() => {
                        aborted = true;
                        break 'submit;
                    }
                    () = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }

            let permit = tokio::select! {
                () = cancel.cancelled() => {
                    aborted = true;
                    break 'submit;
                }
                acquired = Arc::clone(&semaphore).acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => {
                        aborted = true;
                        break 'submit;
                    }
                },
            };

            let tool_request = requests.get(id.as_str()).map(|r| (*r).clone());
            let Some(tool_request) = tool_request else {
                continue;
            };
            let Some(tool) = self.registry.executable(&tool_request.name) else {
                let _ = out_tx
                    .send(Outcome {
                        id: id.clone(),
                        result: None,
                        error: Some(format!("tool {} not found", tool_request.name)),
                    })
                    .await;
                if let Some(progress) = &progress {
                    progress.complete_tool_execution(
                        &batch_id,
                        id,
                        None,
                        Some(format!("tool {} not found", tool_request.name)),
                    );
                }
                drop(permit);
                continue;
            };

            let context = ExecutionContext {
                cancellation: cancel.child_token(),
                principal: request.context.principal.clone(),
                working_dir: tool_request
                    .context
                    .working_dir
                    .clone()
                    .or_else(|| request.context.working_dir.clone()),
                metadata: tool_request.context.metadata.clone(),
            };
            let job_request = ToolRequest::new(tool_request.name.clone(), tool_request.parameters)
                .with_context(context);

            let pool = Arc::clone(&self.pool);
            let out_tx = out_tx.clone();
            let progress = progress.clone();
            let batch_id = batch_id.clone();
            let id = id.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let now_active = active.fetch_add(1, Ordering::AcqRel) + 1;
                peak.fetch_max(now_active, Ordering::AcqRel);
                if let Some(progress) = &progress {
                    progress.update_tool_status(
                        &batch_id,
                        &id,
                        &job_request.name,
                        ExecutionStatus::Running,
                        0.0,
                        "started",
                    );
                }

                let job_id = format!("{}:{}", batch_id, id);
                let outcome = match pool.submit(job_id, tool, job_request).await {
                    Ok(rx) => match rx.await {
                        Ok(result) => {
                            let error = (!result.success).then(|| result.error.clone());
                            if let Some(progress) = &progress {
                                progress.complete_tool_execution(
                                    &batch_id,
                                    &id,
                                    Some(result.clone()),
                                    error.clone(),
                                );
                            }
                            Outcome {
                                id: id.clone(),
                                result: Some(result),
                                error,
                            }
                        }
                        Err(_) => {
                            let message = "result channel closed before delivery".to_string();
                            if let Some(progress) = &progress {
                                progress.complete_tool_execution(
                                    &batch_id,
                                    &id,
                                    None,
                                    Some(message.clone()),
                                );
                            }
                            Outcome {
                                id: id.clone(),
                                result: None,
                                error: Some(message),
                            }
                        }
                    },
                    Err(err) => {
                        warn!("batch {} failed to submit '{}': {}", batch_id, id, err);
                        if let Some(progress) = &progress {
                            progress.complete_tool_execution(
                                &batch_id,
                                &id,
                                None,
                                Some(err.to_string()),
                            );
                        }
                        Outcome {
                            id: id.clone(),
                            result: None,
                            error: Some(err.to_string()),
                        }
                    }
                };
                active.fetch_sub(1, Ordering::AcqRel);
                let _ = out_tx.send(outcome).await;
            }));
        }

        drop(out_tx);
        for task in tasks {
            let _ = task.await;
        }
        let _ = consumer.await;
        watchdog.abort();

        if aborted
            && let Some(progress) = &progress
        {
            progress.cancel_tracker(&batch_id);
        }

        let state = {
            let mut guard = lock(&shared);
            std::mem::take(&mut *guard)
        };

        // Graph statuses for the metadata snapshot.
        for id in &order {
            let status = if state.errors.contains_key(id) {
                NodeStatus::Failed
            } else if state.results.contains_key(id) {
                NodeStatus::Completed
            } else if aborted {
                NodeStatus::Cancelled
            } else {
                NodeStatus::Pending
            };
            let _ = graph.mark_status(id, status);
        }

        if request.context.cancellation.is_cancelled() {
            debug!("batch {} cancelled by caller", batch_id);
            return Err(RatchetError::Cancelled);
        }
        if timed_out.load(Ordering::Acquire) {
            debug!("batch {} timed out after {:?}", batch_id, timeout);
            return Err(RatchetError::Timeout(timeout));
        }

        batch.results = state.results;
        batch.errors = state.errors;
        batch.finalize(aborted);
        batch.metadata.concurrent_executions = peak.load(Ordering::Acquire);
        batch.metadata.dependency_graph = graph.stats();
        batch.metadata.execution_order = order;
        batch.metadata.resource_usage = self.pool.get_stats();
        info!(
            "batch {} finished: {}/{} succeeded, {} errors",
            batch_id, batch.success_count, batch.tools_count, batch.error_count
        );
        Ok(batch)
    }

    /// One id per tool: the `"id"` parameter when present, else
    /// `"<tool_name>_<index>"`. Validates uniqueness and that the dependency
    /// map only references known ids.
    fn assign_ids(request: &BatchRequest) -> RatchetResult<Vec<String>> {
        if request.tools.is_empty() {
            return Err(RatchetError::Validation("empty tools list".into()));
        }
        let mut ids = Vec::with_capacity(request.tools.len());
        let mut seen = HashSet::new();
        for (index, tool) in request.tools.iter().enumerate() {
            let id = tool
                .id_hint()
                .map(ToString::to_string)
                .unwrap_or_else(|| format!("{}_{}", tool.name, index));
            if !seen.insert(id.clone()) {
                return Err(RatchetError::Validation(format!(
                    "duplicate tool id '{}'",
                    id
                )));
            }
            ids.push(id);
        }
        for (id, deps) in &request.dependencies {
            if !seen.contains(id) {
                return Err(RatchetError::Validation(format!(
                    "dependency map references unknown tool id '{}'",
                    id
                )));
            }
            for dep in deps {
                if !seen.contains(dep) {
                    return Err(RatchetError::Validation(format!(
                        "tool '{}' depends on unknown id '{}'",
                        id, dep
                    )));
                }
            }
        }
        Ok(ids)
    }

    fn build_graph(request: &BatchRequest, ids: &[String]) -> RatchetResult<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        for (id, tool) in ids.iter().zip(&request.tools) {
            graph.add_node(id.clone(), tool.name.clone(), tool.parameters.clone())?;
        }
        for (id, deps) in &request.dependencies {
            for dep in deps {
                graph.add_dependency(id, dep)?;
            }
        }
        Ok(graph)
    }

    fn spawn_consumer(
        &self,
        mut out_rx: mpsc::Receiver<Outcome>,
        shared: Arc<Mutex<SharedState>>,
        stop_on_first_error: bool,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(outcome) = out_rx.recv().await {
                let failed = outcome.error.is_some();
                {
                    let mut state = lock(&shared);
                    if let Some(result) = outcome.result {
                        state.results.insert(outcome.id.clone(), result);
                    }
                    if let Some(error) = outcome.error {
                        state.errors.insert(outcome.id.clone(), error);
                    }
                    state.completed.insert(outcome.id);
                }
                if failed && stop_on_first_error && !cancel.is_cancelled() {
                    debug!("stop_on_first_error: cancelling remaining work");
                    cancel.cancel();
                }
            }
        })
    }
}

fn lock(shared: &Arc<Mutex<SharedState>>) -> std::sync::MutexGuard<'_, SharedState> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests;
