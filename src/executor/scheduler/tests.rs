use super::*;
use crate::config::ExecutorConfig;
use crate::executor::batch::{BatchOptions, BatchStatus};
use crate::permissions::PermissionManager;
use crate::progress::ProgressManager;
use crate::tools::base::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::{Duration, Instant};

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes the text parameter"
    }
    fn json_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }
    async fn execute(
        &self,
        params: Value,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::ok(
            params["text"].as_str().unwrap_or("").to_string(),
        ))
    }
}

struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }
    fn description(&self) -> &str {
        "Sleeps for millis, honouring cancellation"
    }
    fn json_schema(&self) -> Value {
        json!({"type": "object", "properties": {"millis": {"type": "integer"}}})
    }
    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult> {
        let millis = params["millis"].as_u64().unwrap_or(50);
        tokio::select! {
            () = ctx.cancellation.cancelled() => Ok(ToolResult::error("Execution cancelled")),
            () = tokio::time::sleep(Duration::from_millis(millis)) => Ok(ToolResult::ok("slept")),
        }
    }
}

struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn json_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(
        &self,
        _params: Value,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::error("deliberate failure"))
    }
}

async fn harness(max_concurrent: usize) -> (BatchScheduler, Arc<ExecutorPool>) {
    let registry = Arc::new(
        ToolRegistry::new().with_permissions(PermissionManager::with_patterns(Vec::new(), true)),
    );
    registry.register(Arc::new(EchoTool)).unwrap();
    registry.register(Arc::new(SleepTool)).unwrap();
    registry.register(Arc::new(FailTool)).unwrap();

    let pool = Arc::new(ExecutorPool::new(&ExecutorConfig::default()));
    pool.start().unwrap();

    let config = SchedulerConfig {
        max_concurrent,
        default_timeout_s: 30,
        poll_interval_ms: 10,
    };
    (
        BatchScheduler::new(registry, Arc::clone(&pool), config),
        pool,
    )
}

#[tokio::test]
async fn empty_batch_is_a_validation_error() {
    let (scheduler, pool) = harness(4).await;
    let err = scheduler.execute(BatchRequest::new(Vec::new())).await.unwrap_err();
    assert!(matches!(err, RatchetError::Validation(_)));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn duplicate_ids_are_rejected_before_any_work() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("echo", json!({"id": "same", "text": "a"})),
        ToolRequest::new("echo", json!({"id": "same", "text": "b"})),
    ]);
    let err = scheduler.execute(request).await.unwrap_err();
    assert!(matches!(err, RatchetError::Validation(_)));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_dependency_id_is_rejected() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![ToolRequest::new("echo", json!({"text": "a"}))])
        .with_dependencies(HashMap::from([(
            "echo_0".to_string(),
            vec!["ghost".to_string()],
        )]));
    let err = scheduler.execute(request).await.unwrap_err();
    assert!(matches!(err, RatchetError::Validation(_)));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn cycle_fails_the_whole_request() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("echo", json!({"id": "t1"})),
        ToolRequest::new("echo", json!({"id": "t2"})),
    ])
    .with_dependencies(HashMap::from([
        ("t1".to_string(), vec!["t2".to_string()]),
        ("t2".to_string(), vec!["t1".to_string()]),
    ]));
    let err = scheduler.execute(request).await.unwrap_err();
    assert!(matches!(err, RatchetError::Cycle(_)));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn default_ids_use_name_and_index() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("echo", json!({"text": "a"})),
        ToolRequest::new("echo", json!({"text": "b"})),
    ]);
    let batch = scheduler.execute(request).await.unwrap();
    assert!(batch.results.contains_key("echo_0"));
    assert!(batch.results.contains_key("echo_1"));
    assert_eq!(batch.status, BatchStatus::Completed);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn dependent_starts_after_dependency_ends() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("sleep", json!({"id": "first", "millis": 60})),
        ToolRequest::new("sleep", json!({"id": "second", "millis": 10})),
    ])
    .with_dependencies(HashMap::from([(
        "second".to_string(),
        vec!["first".to_string()],
    )]));
    let batch = scheduler.execute(request).await.unwrap();
    assert_eq!(batch.success_count, 2);
    let first_end = batch.results["first"].metadata.end_time;
    let second_start = batch.results["second"].metadata.start_time;
    assert!(
        second_start >= first_end,
        "dependent started at {} before dependency ended at {}",
        second_start,
        first_end
    );
    assert_eq!(batch.metadata.execution_order, vec!["first", "second"]);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn concurrency_cap_serializes_work() {
    let (scheduler, pool) = harness(1).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("sleep", json!({"id": "a", "millis": 50})),
        ToolRequest::new("sleep", json!({"id": "b", "millis": 50})),
        ToolRequest::new("sleep", json!({"id": "c", "millis": 50})),
    ]);
    let started = Instant::now();
    let batch = scheduler.execute(request).await.unwrap();
    assert_eq!(batch.success_count, 3);
    assert!(
        started.elapsed() >= Duration::from_millis(150),
        "cap of 1 must serialize: {:?}",
        started.elapsed()
    );
    assert_eq!(batch.metadata.concurrent_executions, 1);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn independent_tools_run_in_parallel() {
    let (scheduler, pool) = harness(3).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("sleep", json!({"id": "a", "millis": 100})),
        ToolRequest::new("sleep", json!({"id": "b", "millis": 100})),
        ToolRequest::new("sleep", json!({"id": "c", "millis": 100})),
    ]);
    let started = Instant::now();
    let batch = scheduler.execute(request).await.unwrap();
    assert_eq!(batch.success_count, 3);
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "three 100ms sleeps with cap 3 took {:?}",
        started.elapsed()
    );
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn mixed_outcomes_do_not_fail_the_batch() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("echo", json!({"id": "ok", "text": "fine"})),
        ToolRequest::new("fail", json!({"id": "bad"})),
    ]);
    let batch = scheduler.execute(request).await.unwrap();
    assert_eq!(batch.tools_count, 2);
    assert_eq!(batch.success_count, 1);
    assert_eq!(batch.error_count, 1);
    assert_eq!(batch.status, BatchStatus::Partial);
    // The failed tool ran, so it appears in both maps.
    assert!(batch.results.contains_key("bad"));
    assert!(batch.errors.contains_key("bad"));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_tool_name_lands_only_in_errors() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("ghost", json!({"id": "missing"})),
        ToolRequest::new("echo", json!({"id": "after", "text": "still runs"})),
    ])
    .with_dependencies(HashMap::from([(
        "after".to_string(),
        vec!["missing".to_string()],
    )]));
    let batch = scheduler.execute(request).await.unwrap();
    assert!(!batch.results.contains_key("missing"));
    assert!(batch.errors.contains_key("missing"));
    // Dependents of a failed dependency still run.
    assert_eq!(batch.results["after"].content, "still runs");
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn pre_cancelled_context_returns_the_context_error() {
    let (scheduler, pool) = harness(4).await;
    let context = ExecutionContext::new();
    context.cancellation.cancel();
    let request = BatchRequest::new(vec![ToolRequest::new(
        "sleep",
        json!({"id": "t", "millis": 10_000}),
    )])
    .with_context(context);
    let err = scheduler.execute(request).await.unwrap_err();
    assert!(matches!(err, RatchetError::Cancelled));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn timeout_bounds_the_batch() {
    let (scheduler, pool) = harness(4).await;
    let request = BatchRequest::new(vec![ToolRequest::new(
        "sleep",
        json!({"id": "t", "millis": 10_000}),
    )])
    .with_timeout(Duration::from_millis(100));
    let started = Instant::now();
    let err = scheduler.execute(request).await.unwrap_err();
    assert!(matches!(err, RatchetError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn stop_on_first_error_cancels_the_rest() {
    let (scheduler, pool) = harness(1).await;
    let request = BatchRequest::new(vec![
        ToolRequest::new("fail", json!({"id": "bad"})),
        ToolRequest::new("sleep", json!({"id": "slow", "millis": 5_000})),
    ])
    .with_dependencies(HashMap::from([(
        "slow".to_string(),
        vec!["bad".to_string()],
    )]))
    .with_options(BatchOptions {
        stop_on_first_error: true,
    });
    let started = Instant::now();
    let batch = scheduler.execute(request).await.unwrap();
    assert!(batch.errors.contains_key("bad"));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "remaining work was not cancelled: {:?}",
        started.elapsed()
    );
    assert_eq!(batch.status, BatchStatus::Cancelled);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn progress_tracker_reaches_terminal_state() {
    let (scheduler, pool) = harness(4).await;
    let progress = ProgressManager::new(Duration::from_millis(10));
    let terminal = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&terminal);
    progress.subscribe("*", move |update| {
        if update.status == ExecutionStatus::Completed && update.completed_tools == 2 {
            seen.store(true, Ordering::SeqCst);
        }
    });
    progress.start();

    let request = BatchRequest::new(vec![
        ToolRequest::new("echo", json!({"id": "t1", "text": "x"})),
        ToolRequest::new("echo", json!({"id": "t2", "text": "y"})),
    ])
    .with_progress(Arc::clone(&progress));
    let batch = scheduler.execute(request).await.unwrap();
    assert_eq!(batch.success_count, 2);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(terminal.load(Ordering::SeqCst), "no terminal update seen");
    progress.close().await;
    pool.stop().await.unwrap();
}
