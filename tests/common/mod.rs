#![allow(dead_code)] // each test binary uses a different subset of these helpers

use async_trait::async_trait;
use ratchet::config::{ExecutorConfig, SchedulerConfig, ShellToolConfig};
use ratchet::executor::{BatchScheduler, ExecutorPool};
use ratchet::permissions::PermissionManager;
use ratchet::tools::{ExecutionContext, Tool, ToolRegistry, ToolResult};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A sleep tool that honours cancellation, for timing-sensitive scenarios.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }
    fn description(&self) -> &str {
        "Sleeps for the given milliseconds"
    }
    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "millis": { "type": "integer" } },
            "required": ["millis"]
        })
    }
    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        let millis = params["millis"].as_u64().unwrap_or(100);
        tokio::select! {
            () = ctx.cancellation.cancelled() => Ok(ToolResult::error("Execution cancelled")),
            () = tokio::time::sleep(Duration::from_millis(millis)) => Ok(ToolResult::ok("slept")),
        }
    }
}

/// A tool that always panics, for isolation tests.
pub struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "panic_tool"
    }
    fn description(&self) -> &str {
        "A tool that panics"
    }
    fn json_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        panic!("intentional panic for testing");
    }
}

/// Registry with the built-in tools rooted in `workspace` and the default
/// permission allow-list.
pub fn builtin_registry(workspace: &Path) -> Arc<ToolRegistry> {
    let mut shell = ShellToolConfig::default();
    shell.working_dir = Some(workspace.to_path_buf());
    let registry = Arc::new(ToolRegistry::new());
    registry.register_builtin_tools(&shell).unwrap();
    registry
}

/// Built-in tools with a wide-open shell pattern, for scenarios that need
/// commands outside the default allow-list (e.g. `exit 1`).
pub fn permissive_builtin_registry(workspace: &Path) -> Arc<ToolRegistry> {
    let mut shell = ShellToolConfig::default();
    shell.working_dir = Some(workspace.to_path_buf());
    let patterns = vec![
        "shell(*)".to_string(),
        "read_file(*)".to_string(),
        "write_file(*)".to_string(),
    ];
    let registry = Arc::new(
        ToolRegistry::new().with_permissions(PermissionManager::with_patterns(patterns, false)),
    );
    registry.register_builtin_tools(&shell).unwrap();
    registry
}

/// Registry that allows everything, for tests not about permissions.
pub fn open_registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new().with_permissions(PermissionManager::with_patterns(Vec::new(), true)))
}

/// A started pool plus a scheduler over `registry`.
pub fn scheduler_over(
    registry: Arc<ToolRegistry>,
    max_concurrent: usize,
) -> (BatchScheduler, Arc<ExecutorPool>) {
    let pool = Arc::new(ExecutorPool::new(&ExecutorConfig::default()));
    pool.start().unwrap();
    let config = SchedulerConfig {
        max_concurrent,
        default_timeout_s: 60,
        poll_interval_ms: 20,
    };
    (
        BatchScheduler::new(registry, Arc::clone(&pool), config),
        pool,
    )
}
