use super::*;
use serde_json::json;

#[test]
fn success_result_has_empty_error() {
    let result = ToolResult::ok("done");
    assert!(result.success);
    assert!(result.error.is_empty());
    assert_eq!(result.to_string(), "done");
}

#[test]
fn error_result_is_not_success() {
    let result = ToolResult::error("broke");
    assert!(!result.success);
    assert_eq!(result.error, "broke");
    assert_eq!(result.to_string(), "broke");
}

#[test]
fn from_result_formats_errors() {
    let ok = ToolResult::from_result(Ok("fine".to_string()), "shell");
    assert!(ok.success);
    let err = ToolResult::from_result(Err(anyhow::anyhow!("exit 1")), "shell");
    assert!(!err.success);
    assert_eq!(err.error, "shell error: exit 1");
}

#[test]
fn id_hint_reads_parameters() {
    let req = ToolRequest::new("shell", json!({"id": "t1", "command": "ls"}));
    assert_eq!(req.id_hint(), Some("t1"));
    let req = ToolRequest::new("shell", json!({"command": "ls"}));
    assert_eq!(req.id_hint(), None);
}

#[test]
fn child_context_inherits_cancellation() {
    let parent = ExecutionContext::new();
    let child = parent.child();
    assert!(!child.cancellation.is_cancelled());
    parent.cancellation.cancel();
    assert!(child.cancellation.is_cancelled());
}

#[test]
fn default_permission_input_prefers_command() {
    struct Probe;
    #[async_trait]
    impl Tool for Probe {
        fn name(&self) -> &str {
            "probe"
        }
        fn description(&self) -> &str {
            "test"
        }
        fn json_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _params: Value,
            _ctx: &ExecutionContext,
        ) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(""))
        }
    }

    let probe = Probe;
    assert_eq!(
        probe.permission_input(&json!({"command": "ls", "path": "/x"})),
        "ls"
    );
    assert_eq!(probe.permission_input(&json!({"path": "/x"})), "/x");
    assert_eq!(probe.permission_input(&json!({"other": 1})), "");
}
