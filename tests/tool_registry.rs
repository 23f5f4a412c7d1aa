mod common;

use common::{PanicTool, open_registry};
use async_trait::async_trait;
use ratchet::config::ExecutorConfig;
use ratchet::executor::ExecutorPool;
use ratchet::permissions::PermissionManager;
use ratchet::tools::{ExecutionContext, Tool, ToolRegistry, ToolRequest, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;

/// A simple test tool that echoes back its parameters.
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes the input"
    }
    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        })
    }
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        let text = params["text"].as_str().unwrap_or("no text");
        Ok(ToolResult::ok(format!("Echo: {}", text)))
    }
}

/// A tool that returns an error result.
struct ErrorTool;

#[async_trait]
impl Tool for ErrorTool {
    fn name(&self) -> &str {
        "error_tool"
    }
    fn description(&self) -> &str {
        "A tool that returns an error"
    }
    fn json_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _params: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::error("Something went wrong".to_string()))
    }
}

#[tokio::test]
async fn registry_executes_and_stamps_every_result() {
    let registry = open_registry();
    registry.register(Arc::new(EchoTool)).unwrap();
    registry.register(Arc::new(ErrorTool)).unwrap();

    let ok = registry
        .execute(ToolRequest::new("echo", json!({"text": "hello"})))
        .await
        .unwrap();
    assert!(ok.success);
    assert_eq!(ok.content, "Echo: hello");
    assert_eq!(ok.metadata.tool_name, "echo");
    assert!(ok.metadata.start_time <= ok.metadata.end_time);

    let failed = registry
        .execute(ToolRequest::new("error_tool", json!({})))
        .await
        .unwrap();
    assert!(!failed.success);
    // Metadata is stamped regardless of success.
    assert_eq!(failed.metadata.tool_name, "error_tool");
}

#[tokio::test]
async fn stats_accumulate_across_executions() {
    let registry = open_registry();
    registry.register(Arc::new(EchoTool)).unwrap();
    for _ in 0..3 {
        registry
            .execute(ToolRequest::new("echo", json!({"text": "x"})))
            .await
            .unwrap();
    }
    let stats = registry.get_tool_stats("echo").unwrap();
    assert_eq!(stats.call_count, 3);
    assert_eq!(stats.success_count, 3);
    assert_eq!(
        stats.call_count,
        stats.success_count + stats.error_count + stats.current_calls
    );
    assert!(stats.last_called.is_some());

    registry.reset_tool_stats("echo");
    assert!(registry.get_tool_stats("echo").is_none());
}

#[tokio::test]
async fn panic_is_isolated_by_the_pool_not_the_registry() {
    let registry = open_registry();
    registry.register(Arc::new(EchoTool)).unwrap();
    registry.register(Arc::new(PanicTool)).unwrap();

    let pool = ExecutorPool::new(&ExecutorConfig::default());
    pool.start().unwrap();

    let handle = registry.executable("panic_tool").unwrap();
    let rx = pool
        .submit("p1", handle, ToolRequest::new("panic_tool", json!({})))
        .await
        .unwrap();
    let result = rx.await.unwrap();
    assert!(!result.success);
    assert!(result.error.contains("panicked"));

    // Workers survive and still serve other registry-bound tools.
    let handle = registry.executable("echo").unwrap();
    let rx = pool
        .submit(
            "e1",
            handle,
            ToolRequest::new("echo", json!({"text": "alive"})),
        )
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap().content, "Echo: alive");
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn default_allow_list_gates_the_shell() {
    let workspace = tempfile::tempdir().unwrap();
    let registry = common::builtin_registry(workspace.path());

    let allowed = registry
        .execute(ToolRequest::new("shell", json!({"command": "echo hi"})))
        .await
        .unwrap();
    assert!(allowed.success, "{}", allowed.error);

    let denied = registry
        .execute(ToolRequest::new(
            "shell",
            json!({"command": "curl http://example.com"}),
        ))
        .await
        .unwrap();
    assert!(!denied.success);
    assert!(denied.error.contains("Permission denied"));
}

#[tokio::test]
async fn provider_definitions_cover_all_registered_tools() {
    let registry = open_registry();
    registry.register(Arc::new(EchoTool)).unwrap();
    registry.register(Arc::new(ErrorTool)).unwrap();

    let defs = registry.get_definitions("anthropic").unwrap();
    assert_eq!(defs.len(), 2);
    // Sorted by name.
    assert_eq!(defs[0]["name"], "echo");
    assert_eq!(defs[1]["name"], "error_tool");
    assert!(defs[0]["input_schema"]["properties"]["text"].is_object());

    assert!(registry.get_definitions("no_such_provider").is_err());
}

#[tokio::test]
async fn execute_async_returns_a_single_shot_channel() {
    let registry = open_registry();
    registry.register(Arc::new(EchoTool)).unwrap();
    let rx = registry.execute_async(ToolRequest::new("echo", json!({"text": "bg"})));
    assert_eq!(rx.await.unwrap().content, "Echo: bg");
}

#[tokio::test]
async fn bypass_mode_allows_everything() {
    let registry = Arc::new(
        ToolRegistry::new().with_permissions(PermissionManager::with_patterns(Vec::new(), true)),
    );
    registry.register(Arc::new(EchoTool)).unwrap();
    let result = registry
        .execute(ToolRequest::new("echo", json!({"text": "open"})))
        .await
        .unwrap();
    assert!(result.success);
}
