use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Context threaded through every tool execution: cooperative cancellation,
/// the principal charged for rate limiting, and free-form metadata from the
/// originating request.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub cancellation: CancellationToken,
    /// Rate-limiting principal (user id). Anonymous when absent.
    pub principal: Option<String>,
    /// Base directory for tools that resolve relative paths.
    pub working_dir: Option<PathBuf>,
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            ..Self::default()
        }
    }

    /// A child context whose token is cancelled when this one is.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            principal: self.principal.clone(),
            working_dir: self.working_dir.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// One requested tool invocation. Lives for exactly one execution.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub name: String,
    /// JSON object of parameters, constrained per tool by its schema.
    pub parameters: Value,
    pub context: ExecutionContext,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            parameters,
            context: ExecutionContext::default(),
        }
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// The caller-chosen id, when the parameters carry one.
    pub fn id_hint(&self) -> Option<&str> {
        self.parameters.get("id").and_then(Value::as_str)
    }
}

/// Execution metadata stamped onto every result by the executor; tools need
/// not fill these fields themselves.
#[derive(Debug, Clone)]
pub struct ResultMetadata {
    pub tool_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub execution_time: Duration,
    pub parameters: Value,
}

impl Default for ResultMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            tool_name: String::new(),
            start_time: now,
            end_time: now,
            execution_time: Duration::ZERO,
            parameters: Value::Null,
        }
    }
}

/// Outcome of one tool invocation. `success` implies `error` is empty.
#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    /// Optional structured payload alongside the text content.
    pub data: Option<Map<String, Value>>,
    pub error: String,
    pub metadata: ResultMetadata,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn ok_with_data(content: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            success: true,
            content: content.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            ..Self::default()
        }
    }

    /// Convert a `Result<String>` into a `ToolResult`, formatting errors
    /// with the given prefix (e.g. `"shell"`).
    pub fn from_result(result: anyhow::Result<String>, error_prefix: &str) -> Self {
        match result {
            Ok(content) => Self::ok(content),
            Err(err) => Self::error(format!("{} error: {}", error_prefix, err)),
        }
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success {
            write!(f, "{}", self.content)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

/// A named capability invocable by the runtime.
///
/// Implementations may block and must return promptly once
/// `ctx.cancellation` fires.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-Schema for the accepted parameters (`"type": "object"` with
    /// `"properties"` and `"required"`).
    fn json_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolResult>;

    /// The operation string checked against the permission allow-list.
    /// Defaults to the most specific of `command` / `path` / `url`.
    fn permission_input(&self, params: &Value) -> String {
        for key in ["command", "path", "url"] {
            if let Some(input) = params.get(key).and_then(Value::as_str) {
                return input.to_string();
            }
        }
        String::new()
    }
}

#[cfg(test)]
mod tests;
