use crate::config::ShellToolConfig;
use crate::tools::base::{ExecutionContext, Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

/// Maximum combined stdout+stderr size before truncation.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024; // 1 MB

/// Environment variables safe to pass through to child processes. Everything
/// else (API keys, tokens) is withheld.
const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "LANG", "LC_ALL", "TZ", "TERM", "TMPDIR",
];

/// Command substrings that are never run, regardless of the allow-list.
const DENY_PATTERNS: &[&str] = &[
    r"rm\s+(-[a-z]*[rf][a-z]*\s+)+(/|~)(\s|$)",
    r"mkfs(\.|\s)",
    r"dd\s+.*of=/dev/",
    r":\(\)\s*\{.*\};\s*:",
    r"\b(shutdown|reboot|halt|poweroff)\b",
];

/// Known prefix commands that wrap another command.
const PREFIX_COMMANDS: &[&str] = &["sudo", "env", "command", "nohup", "nice", "time", "xargs"];

/// Built-in shell tool: runs a command line under `sh -c` with a scrubbed
/// environment, an output cap, a timeout, and cooperative cancellation.
pub struct ShellTool {
    config: ShellToolConfig,
    deny: Vec<Regex>,
}

impl ShellTool {
    pub fn new(config: ShellToolConfig) -> Result<Self> {
        let deny = DENY_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<Vec<_>, _>>()
            .context("failed to compile shell deny patterns")?;
        Ok(Self { config, deny })
    }

    /// First executable token of one pipeline segment, skipping env-var
    /// assignments, flags, and wrapper commands like sudo/env.
    fn command_name(segment: &str) -> &str {
        let mut saw_prefix = false;
        for part in segment.split_whitespace() {
            if part.contains('=') && !part.starts_with('-') {
                continue;
            }
            if saw_prefix && part.starts_with('-') {
                continue;
            }
            let name = part.rsplit('/').next().unwrap_or(part);
            if PREFIX_COMMANDS.contains(&name) {
                saw_prefix = true;
                continue;
            }
            return name;
        }
        segment.trim()
    }

    /// Every command name in a pipeline/chain, split on `|`, `&&`, `||`,
    /// `;`, and newlines.
    fn all_command_names(command: &str) -> Vec<&str> {
        command
            .split(['\n', ';'])
            .flat_map(|part| part.split("&&"))
            .flat_map(|part| part.split("||"))
            .flat_map(|part| part.split('|'))
            .filter(|segment| !segment.trim().is_empty())
            .map(Self::command_name)
            .collect()
    }

    /// Returns a refusal message when the command violates the allow-list
    /// or a deny pattern.
    fn guard(&self, command: &str) -> Option<String> {
        // Line continuations would otherwise hide arguments from the
        // pattern checks.
        let command = command.replace("\\\n", " ");

        if !self.config.allowed_commands.is_empty() {
            for name in Self::all_command_names(&command) {
                if !self.config.allowed_commands.iter().any(|a| a == name) {
                    return Some(format!(
                        "command '{}' is not in the allowed commands list",
                        name
                    ));
                }
            }
        }

        for pattern in &self.deny {
            if pattern.is_match(&command) {
                return Some(format!("command blocked by safety pattern: {}", pattern));
            }
        }
        None
    }
}

/// A `Command` with a scrubbed environment: only the allow-listed variables
/// are copied from this process.
fn scrubbed_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    cmd.env_clear();
    for &var in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(var) {
            cmd.env(var, val);
        }
    }
    cmd
}

fn cap_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        text.into_owned()
    } else {
        let mut end = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n... [output truncated]", &text[..end])
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its combined output"
    }

    fn json_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line to execute with sh -c"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Optional timeout in seconds"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let Some(command) = params.get("command").and_then(Value::as_str) else {
            return Ok(ToolResult::error("missing required parameter: command"));
        };

        if let Some(refusal) = self.guard(command) {
            warn!("shell tool refused '{}': {}", command, refusal);
            return Ok(ToolResult::error(refusal));
        }

        let timeout = params
            .get("timeout")
            .and_then(Value::as_u64)
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| self.config.timeout());

        let mut cmd = scrubbed_command("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let working_dir = ctx
            .working_dir
            .as_ref()
            .or(self.config.working_dir.as_ref());
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", command))?;

        // Dropping the in-flight wait kills the child (kill_on_drop), so
        // both arms below leave no orphan behind.
        let output = tokio::select! {
            () = ctx.cancellation.cancelled() => {
                return Ok(ToolResult::error("Execution cancelled"));
            }
            waited = tokio::time::timeout(timeout, child.wait_with_output()) => match waited {
                Ok(Ok(output)) => output,
                Ok(Err(err)) => {
                    return Ok(ToolResult::error(format!("command failed to run: {}", err)));
                }
                Err(_) => {
                    return Ok(ToolResult::error(format!(
                        "command timed out after {}s",
                        timeout.as_secs()
                    )));
                }
            },
        };

        let mut combined = cap_output(&output.stdout);
        if !output.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&cap_output(&output.stderr));
        }

        if output.status.success() {
            Ok(ToolResult::ok(combined))
        } else {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Ok(ToolResult::error(format!(
                "command exited with status {}: {}",
                code, combined
            )))
        }
    }
}
