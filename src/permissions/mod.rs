use crate::config::PermissionConfig;
use crate::errors::{RatchetError, RatchetResult};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// Built-in allow-list used when no file is configured or the file cannot
/// be read or parsed.
const DEFAULT_ALLOW: &[&str] = &[
    "read_file(*)",
    "write_file(*)",
    "shell(echo:*)",
    "shell(ls:*)",
    "shell(cat:*)",
    "shell(grep:*)",
    "shell(pwd)",
    "shell(git:*)",
];

/// On-disk shape: `{ "permissions": { "allow": [ "Tool(matcher)", ... ] } }`.
#[derive(Debug, Deserialize)]
struct AllowListFile {
    permissions: AllowListSection,
}

#[derive(Debug, Deserialize)]
struct AllowListSection {
    #[serde(default)]
    allow: Vec<String>,
}

/// One parsed `ToolName(matcher)` pattern.
#[derive(Debug, Clone, PartialEq)]
struct Pattern {
    tool: String,
    matcher: Matcher,
}

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    /// `*`
    Any,
    /// `*.ext` — input ends with the extension.
    Suffix(String),
    /// `prefix/*` — input lives under the directory.
    DirPrefix(String),
    /// `cmd:*` — input is the command, or the command followed by an
    /// argument separator (`cmd`, `cmd …`, `cmd:…`).
    CommandPrefix(String),
    /// `prefix*`
    Prefix(String),
    Exact(String),
}

impl Matcher {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            Matcher::Any
        } else if let Some(ext) = raw.strip_prefix("*.") {
            Matcher::Suffix(format!(".{}", ext))
        } else if let Some(dir) = raw.strip_suffix("/*") {
            Matcher::DirPrefix(format!("{}/", dir))
        } else if let Some(cmd) = raw.strip_suffix(":*") {
            Matcher::CommandPrefix(cmd.to_string())
        } else if let Some(prefix) = raw.strip_suffix('*') {
            Matcher::Prefix(prefix.to_string())
        } else {
            Matcher::Exact(raw.to_string())
        }
    }

    fn matches(&self, input: &str) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Suffix(ext) => input.ends_with(ext.as_str()),
            Matcher::DirPrefix(dir) => input.starts_with(dir.as_str()),
            Matcher::CommandPrefix(cmd) => {
                input == cmd
                    || input
                        .strip_prefix(cmd.as_str())
                        .is_some_and(|rest| rest.starts_with(' ') || rest.starts_with(':'))
            }
            Matcher::Prefix(prefix) => input.starts_with(prefix.as_str()),
            Matcher::Exact(exact) => input == exact,
        }
    }
}

/// Pattern-matches tool operations against an ordered allow-list.
///
/// A pure predicate: the list is loaded once at construction and `validate`
/// performs no I/O.
pub struct PermissionManager {
    allowed: Vec<Pattern>,
    bypass: bool,
}

impl PermissionManager {
    /// Load the allow-list from the configured file, falling back to the
    /// built-in defaults when the file is absent or malformed.
    pub fn from_config(config: &PermissionConfig) -> Self {
        let raw = match &config.allowlist_path {
            Some(path) => Self::load_file(path),
            None => None,
        };
        let patterns = raw.unwrap_or_else(|| {
            DEFAULT_ALLOW.iter().map(|s| (*s).to_string()).collect()
        });
        Self::with_patterns(patterns, config.bypass)
    }

    pub fn with_patterns(patterns: Vec<String>, bypass: bool) -> Self {
        let allowed = patterns
            .iter()
            .filter_map(|raw| {
                let pattern = Self::parse_pattern(raw);
                if pattern.is_none() {
                    warn!("ignoring malformed permission pattern '{}'", raw);
                }
                pattern
            })
            .collect();
        Self { allowed, bypass }
    }

    /// Check `tool(input)` against the allow-list.
    pub fn validate(&self, tool: &str, input: &str) -> RatchetResult<()> {
        if self.bypass {
            return Ok(());
        }
        let permitted = self
            .allowed
            .iter()
            .any(|pattern| pattern.tool == tool && pattern.matcher.matches(input));
        if permitted {
            Ok(())
        } else {
            Err(RatchetError::PermissionDenied {
                tool: tool.to_string(),
                input: input.to_string(),
            })
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.allowed.len()
    }

    fn parse_pattern(raw: &str) -> Option<Pattern> {
        let open = raw.find('(')?;
        let close = raw.rfind(')')?;
        if close != raw.len() - 1 || open == 0 || close <= open {
            return None;
        }
        let tool = raw[..open].trim();
        let matcher = raw[open + 1..close].trim();
        if tool.is_empty() || matcher.is_empty() {
            return None;
        }
        Some(Pattern {
            tool: tool.to_string(),
            matcher: Matcher::parse(matcher),
        })
    }

    fn load_file(path: &Path) -> Option<Vec<String>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(
                    "permission allow-list {} unreadable ({}) — using defaults",
                    path.display(),
                    err
                );
                return None;
            }
        };
        match serde_json::from_str::<AllowListFile>(&contents) {
            Ok(file) => {
                debug!(
                    "loaded {} permission patterns from {}",
                    file.permissions.allow.len(),
                    path.display()
                );
                Some(file.permissions.allow)
            }
            Err(err) => {
                warn!(
                    "permission allow-list {} malformed ({}) — using defaults",
                    path.display(),
                    err
                );
                None
            }
        }
    }
}
