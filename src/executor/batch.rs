use crate::executor::graph::GraphStats;
use crate::executor::pool::PoolStats;
use crate::progress::ProgressManager;
use crate::tools::base::{ExecutionContext, ToolRequest, ToolResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Batch-level options.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Cancel the batch's derived context on the first observed failure.
    /// Running peers are cancelled cooperatively; nothing new is submitted.
    pub stop_on_first_error: bool,
}

/// A DAG of tool invocations executed as one request.
///
/// Each tool gets an id: the string value of an `"id"` parameter when
/// present, else `"<tool_name>_<index>"`. The `dependencies` map is keyed by
/// those ids.
pub struct BatchRequest {
    pub tools: Vec<ToolRequest>,
    pub dependencies: HashMap<String, Vec<String>>,
    /// Clamped to the scheduler's default timeout.
    pub timeout: Option<Duration>,
    pub context: ExecutionContext,
    pub options: BatchOptions,
    /// When set, the scheduler streams per-tool lifecycle events to a
    /// tracker named after the batch.
    pub progress: Option<Arc<ProgressManager>>,
}

impl BatchRequest {
    pub fn new(tools: Vec<ToolRequest>) -> Self {
        Self {
            tools,
            dependencies: HashMap::new(),
            timeout: None,
            context: ExecutionContext::default(),
            options: BatchOptions::default(),
            progress: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: HashMap<String, Vec<String>>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressManager>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Terminal classification of a batch, computed from the counts and how the
/// run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    Failed,
    Partial,
    Cancelled,
}

/// Execution metadata attached to every batch result.
#[derive(Debug, Clone, Default)]
pub struct BatchMetadata {
    /// Peak number of tools running at once.
    pub concurrent_executions: usize,
    pub dependency_graph: GraphStats,
    /// The topological order the scheduler walked.
    pub execution_order: Vec<String>,
    pub resource_usage: PoolStats,
}

/// Aggregated outcome of a batch.
///
/// A tool that ran and reported failure appears in both `results` and
/// `errors`; a tool that could not be invoked at all appears only in
/// `errors`.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: HashMap<String, ToolResult>,
    pub errors: HashMap<String, String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
    pub tools_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub status: BatchStatus,
    pub metadata: BatchMetadata,
}

impl BatchResult {
    /// A result shell for `tools_count` expected tools, to be filled as
    /// outcomes arrive.
    pub fn pending(tools_count: usize) -> Self {
        let now = Utc::now();
        Self {
            results: HashMap::new(),
            errors: HashMap::new(),
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            tools_count,
            success_count: 0,
            error_count: 0,
            status: BatchStatus::Partial,
            metadata: BatchMetadata::default(),
        }
    }

    /// Recompute the counts and status from the result/error maps.
    pub fn finalize(&mut self, cancelled: bool) {
        self.end_time = Utc::now();
        self.duration = (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.success_count = self.results.values().filter(|r| r.success).count();
        self.error_count = self.errors.len();
        let settled = self.success_count + self.error_count;
        self.status = if cancelled && settled < self.tools_count {
            BatchStatus::Cancelled
        } else if self.error_count == 0 && self.success_count >= self.tools_count {
            BatchStatus::Completed
        } else if self.success_count == 0 && self.error_count > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };
    }
}
