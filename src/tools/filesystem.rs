use crate::config::ShellToolConfig;
use crate::tools::base::{ExecutionContext, Tool, ToolResult};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Component, Path, PathBuf};

/// Files larger than this are truncated on read.
const MAX_READ_BYTES: usize = 512 * 1024;

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem, so escape checks also work for paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Resolve `raw` against the workspace and reject escapes when the tool is
/// workspace-restricted.
fn resolve(
    raw: &str,
    ctx: &ExecutionContext,
    config: &ShellToolConfig,
) -> std::result::Result<PathBuf, String> {
    let workspace = ctx
        .working_dir
        .as_ref()
        .or(config.working_dir.as_ref())
        .cloned();
    let joined = match &workspace {
        Some(root) if Path::new(raw).is_relative() => root.join(raw),
        _ => PathBuf::from(raw),
    };
    let resolved = normalize(&joined);
    if config.restrict_to_workspace
        && let Some(root) = workspace
    {
        let root = normalize(&root);
        if !resolved.starts_with(&root) {
            return Err(format!("path {} escapes the workspace", raw));
        }
    }
    Ok(resolved)
}

/// Built-in file reader.
pub struct ReadFileTool {
    config: ShellToolConfig,
}

impl ReadFileTool {
    pub fn new(config: ShellToolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return its contents"
    }

    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let Some(raw) = params.get("path").and_then(Value::as_str) else {
            return Ok(ToolResult::error("missing required parameter: path"));
        };
        let path = match resolve(raw, ctx, &self.config) {
            Ok(path) => path,
            Err(refusal) => return Ok(ToolResult::error(refusal)),
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.len() > MAX_READ_BYTES => {
                let text = String::from_utf8_lossy(&bytes[..MAX_READ_BYTES]).into_owned();
                Ok(ToolResult::ok(format!(
                    "{}\n... [truncated {} bytes]",
                    text,
                    bytes.len() - MAX_READ_BYTES
                )))
            }
            Ok(bytes) => Ok(ToolResult::ok(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) => Ok(ToolResult::error(format!(
                "failed to read {}: {}",
                path.display(),
                err
            ))),
        }
    }
}

/// Built-in file writer. Creates parent directories as needed.
pub struct WriteFileTool {
    config: ShellToolConfig,
}

impl WriteFileTool {
    pub fn new(config: ShellToolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, replacing what was there"
    }

    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to write" },
                "content": { "type": "string", "description": "New file contents" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let Some(raw) = params.get("path").and_then(Value::as_str) else {
            return Ok(ToolResult::error("missing required parameter: path"));
        };
        let Some(content) = params.get("content").and_then(Value::as_str) else {
            return Ok(ToolResult::error("missing required parameter: content"));
        };
        let path = match resolve(raw, ctx, &self.config) {
            Ok(path) => path,
            Err(refusal) => return Ok(ToolResult::error(refusal)),
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolResult::error(format!(
                "failed to create {}: {}",
                parent.display(),
                err
            )));
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "wrote {} bytes to {}",
                content.len(),
                path.display()
            ))),
            Err(err) => Ok(ToolResult::error(format!(
                "failed to write {}: {}",
                path.display(),
                err
            ))),
        }
    }
}
