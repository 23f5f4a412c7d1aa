use crate::errors::{RatchetError, RatchetResult};
use crate::tools::base::{Tool, ToolResult};
use serde_json::{Value, json};

/// Provider wire formats the registry can export tool definitions and
/// results in. The shapes are emitted verbatim; nothing here talks to a
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Ollama,
    Anthropic,
    Mcp,
}

impl Provider {
    pub fn parse(name: &str) -> RatchetResult<Self> {
        match name {
            "openai" => Ok(Provider::OpenAi),
            "ollama" => Ok(Provider::Ollama),
            "anthropic" => Ok(Provider::Anthropic),
            "mcp" => Ok(Provider::Mcp),
            other => Err(RatchetError::Validation(format!(
                "unsupported provider: {}",
                other
            ))),
        }
    }
}

/// A tool definition in the provider's function-declaration shape.
pub fn tool_definition(provider: Provider, tool: &dyn Tool) -> Value {
    match provider {
        Provider::OpenAi | Provider::Ollama => json!({
            "type": "function",
            "function": {
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.json_schema(),
            }
        }),
        Provider::Anthropic => json!({
            "name": tool.name(),
            "description": tool.description(),
            "input_schema": tool.json_schema(),
        }),
        Provider::Mcp => json!({
            "name": tool.name(),
            "description": tool.description(),
            "inputSchema": tool.json_schema(),
            "type": "tool",
        }),
    }
}

/// A tool result in the provider's tool-message shape. Error flags are only
/// present on failed results.
pub fn tool_result(provider: Provider, result: &ToolResult) -> Value {
    let content = if result.success {
        result.content.as_str()
    } else {
        result.error.as_str()
    };
    match provider {
        Provider::OpenAi | Provider::Ollama => {
            let mut message = json!({
                "content": content,
                "role": "tool",
            });
            if !result.success {
                message["error"] = json!(true);
            }
            message
        }
        Provider::Anthropic => {
            let mut message = json!({
                "type": "tool_result",
                "content": content,
            });
            if !result.success {
                message["is_error"] = json!(true);
            }
            message
        }
        Provider::Mcp => {
            let mut message = json!({
                "content": [{"type": "text", "text": content}],
            });
            if !result.success {
                message["isError"] = json!(true);
            }
            message
        }
    }
}
