use crate::config::ShellToolConfig;
use crate::errors::{RatchetError, RatchetResult};
use crate::limits::RateLimiter;
use crate::permissions::PermissionManager;
use crate::providers::{self, Provider};
use crate::stats::{CompatStatus, StatsTracker, ToolStats};
use crate::tools::base::{ExecutionContext, ResultMetadata, Tool, ToolRequest, ToolResult};
use crate::tools::filesystem::{ReadFileTool, WriteFileTool};
use crate::tools::shell::ShellTool;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Result content larger than this is truncated with a marker.
const DEFAULT_MAX_RESULT_CHARS: usize = 10_000;

/// An execution failure where the runtime could not reach the tool at all.
/// Carries both the typed cause and a stamped failed [`ToolResult`], so
/// callers can branch on either.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ExecuteError {
    pub result: ToolResult,
    #[source]
    pub source: RatchetError,
}

/// Named capability table with permission, rate, stats, and compatibility
/// concerns applied around every execution.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    stats: Arc<StatsTracker>,
    permissions: PermissionManager,
    limiter: Option<Arc<RateLimiter>>,
    max_result_chars: usize,
}

impl ToolRegistry {
    /// Registry with the default allow-list and no rate limiter.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            stats: Arc::new(StatsTracker::new()),
            permissions: PermissionManager::from_config(&Default::default()),
            limiter: None,
            max_result_chars: DEFAULT_MAX_RESULT_CHARS,
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionManager) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max.max(1);
        self
    }

    /// Add a tool. Fails on an invalid or already-registered name; the
    /// registry is unchanged on failure.
    pub fn register(&self, tool: Arc<dyn Tool>) -> RatchetResult<()> {
        let name = tool.name().to_string();
        if name.is_empty() || name.len() > 256 || name.chars().any(char::is_control) {
            return Err(RatchetError::Validation(format!(
                "invalid tool name (len={})",
                name.len()
            )));
        }
        let mut tools = self.write_tools();
        if tools.contains_key(&name) {
            return Err(RatchetError::Validation(format!(
                "tool '{}' already registered",
                name
            )));
        }
        debug!("registered tool '{}'", name);
        tools.insert(name, tool);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> RatchetResult<()> {
        let mut tools = self.write_tools();
        if tools.remove(name).is_none() {
            return Err(RatchetError::ToolNotFound(name.to_string()));
        }
        debug!("unregistered tool '{}'", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read_tools().get(name).cloned()
    }

    /// Sorted tool names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_tools().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tools(&self) -> bool {
        !self.read_tools().is_empty()
    }

    /// Shallow snapshot of every registered tool.
    pub fn get_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.read_tools().values().cloned().collect()
    }

    /// Register the built-in shell and file tools.
    pub fn register_builtin_tools(&self, config: &ShellToolConfig) -> RatchetResult<()> {
        self.register(Arc::new(ShellTool::new(config.clone())?))?;
        self.register(Arc::new(ReadFileTool::new(config.clone())))?;
        self.register(Arc::new(WriteFileTool::new(config.clone())))?;
        Ok(())
    }

    /// Execute the named tool with permission, rate, and cancellation
    /// applied, stamping result metadata and recording stats.
    ///
    /// Tool-reported failures (and permission/rate denials) come back as
    /// `Ok` results with `success == false`. Only "could not be invoked at
    /// all" cases — an unknown name — are an `Err`, which still carries the
    /// stamped failed result.
    pub async fn execute(&self, request: ToolRequest) -> Result<ToolResult, ExecuteError> {
        let start_wall = Utc::now();
        let started = Instant::now();

        let Some(tool) = self.get(&request.name) else {
            let mut result = ToolResult::error(format!("tool {} not found", request.name));
            Self::stamp(&mut result, &request, start_wall, started);
            return Err(ExecuteError {
                result,
                source: RatchetError::ToolNotFound(request.name),
            });
        };

        self.stats.record_start(&request.name);
        let mut result = self.run_gated(tool.as_ref(), &request).await;
        Self::stamp(&mut result, &request, start_wall, started);
        self.truncate(&mut result);
        self.stats
            .record_end(&request.name, result.success, started.elapsed());
        Ok(result)
    }

    /// `execute` on a background task; the returned single-shot channel
    /// yields the result (a failed result for plumbing errors).
    pub fn execute_async(
        self: &Arc<Self>,
        request: ToolRequest,
    ) -> tokio::sync::oneshot::Receiver<ToolResult> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let result = match registry.execute(request).await {
                Ok(result) => result,
                Err(err) => err.result,
            };
            if tx.send(result).is_err() {
                debug!("async execution result dropped: receiver gone");
            }
        });
        rx
    }

    /// A handle implementing [`Tool`] that routes execution back through
    /// this registry, so pool workers inherit the permission/rate/stats
    /// envelope.
    pub fn executable(self: &Arc<Self>, name: &str) -> Option<Arc<dyn Tool>> {
        if !self.read_tools().contains_key(name) {
            return None;
        }
        Some(Arc::new(RegistryExecutable {
            registry: Arc::clone(self),
            name: name.to_string(),
        }))
    }

    /// Definitions for every tool in the named provider's wire shape,
    /// sorted by tool name.
    pub fn get_definitions(&self, provider: &str) -> RatchetResult<Vec<Value>> {
        let provider = Provider::parse(provider)?;
        let mut tools = self.get_tools();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(tools
            .iter()
            .map(|tool| providers::tool_definition(provider, tool.as_ref()))
            .collect())
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    pub fn get_tool_stats(&self, name: &str) -> Option<ToolStats> {
        self.stats.get(name)
    }

    pub fn all_tool_stats(&self) -> Vec<ToolStats> {
        self.stats.all()
    }

    pub fn reset_tool_stats(&self, name: &str) {
        self.stats.reset(name);
    }

    pub fn set_tool_compatibility(&self, tool: &str, model: &str, status: CompatStatus) {
        self.stats.set_compatibility(tool, model, status);
    }

    pub fn get_tool_compatibility(&self, tool: &str, model: &str) -> CompatStatus {
        self.stats.compatibility(tool, model)
    }

    async fn run_gated(&self, tool: &dyn Tool, request: &ToolRequest) -> ToolResult {
        let input = tool.permission_input(&request.parameters);
        if let Err(err) = self.permissions.validate(&request.name, &input) {
            warn!("{}", err);
            return ToolResult::error(err.to_string());
        }

        if let Some(limiter) = &self.limiter {
            let cancel = &request.context.cancellation;
            let admitted = match request.context.principal.as_deref() {
                Some(user) => limiter.wait_user(cancel, user, 1.0).await,
                None => limiter.wait_resource(cancel, &request.name, 1.0).await,
            };
            if let Err(err) = admitted {
                return ToolResult::error(err.to_string());
            }
        }

        if request.context.cancellation.is_cancelled() {
            return ToolResult::error(RatchetError::Cancelled.to_string());
        }

        match tool
            .execute(request.parameters.clone(), &request.context)
            .await
        {
            Ok(result) => result,
            Err(err) => ToolResult::error(err.to_string()),
        }
    }

    fn stamp(
        result: &mut ToolResult,
        request: &ToolRequest,
        start_wall: chrono::DateTime<Utc>,
        started: Instant,
    ) {
        let execution_time = started.elapsed();
        result.metadata = ResultMetadata {
            tool_name: request.name.clone(),
            start_time: start_wall,
            end_time: start_wall
                + chrono::Duration::from_std(execution_time).unwrap_or_else(|_| chrono::Duration::zero()),
            execution_time,
            parameters: request.parameters.clone(),
        };
    }

    fn truncate(&self, result: &mut ToolResult) {
        if result.content.chars().count() <= self.max_result_chars {
            return;
        }
        let kept: String = result.content.chars().take(self.max_result_chars).collect();
        let dropped = result.content.chars().count() - self.max_result_chars;
        result.content = format!("{}\n... [truncated {} chars]", kept, dropped);
    }

    fn read_tools(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        match self.tools.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_tools(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        match self.tools.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry-bound tool handle: executing it re-enters
/// [`ToolRegistry::execute`].
struct RegistryExecutable {
    registry: Arc<ToolRegistry>,
    name: String,
}

#[async_trait]
impl Tool for RegistryExecutable {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "registry-bound tool handle"
    }

    fn json_schema(&self) -> Value {
        self.registry
            .get(&self.name)
            .map(|tool| tool.json_schema())
            .unwrap_or_else(|| serde_json::json!({"type": "object"}))
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        let request = ToolRequest::new(self.name.clone(), params).with_context(ctx.clone());
        match self.registry.execute(request).await {
            Ok(result) => Ok(result),
            Err(err) => Ok(err.result),
        }
    }
}
