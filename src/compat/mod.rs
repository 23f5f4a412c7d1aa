use crate::config::CompatConfig;
use crate::providers::{self, Provider};
use crate::stats::CompatStatus;
use crate::tools::registry::ToolRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Instruction sent with every probe chat.
const PROBE_INSTRUCTION: &str = "respond yes/no if you can use this tool";

/// Content fragments that read as "the model declined".
const NEGATIVE_MARKERS: &[&str] = &["cannot", "can't", "unsupported", "not available", "unable"];

/// Content fragments that read as "the model accepted".
const POSITIVE_MARKERS: &[&str] = &["yes", "can", "available", "supported"];

/// API error fragments that mean the model lacks tool support entirely.
const TOOL_SUPPORT_ERRORS: &[&str] = &[
    "does not support tools",
    "tool use is not supported",
    "tools are not supported",
    "function calling is not",
    "no tool support",
];

/// What a probe chat came back with.
#[derive(Debug, Clone, Default)]
pub struct ProbeResponse {
    pub content: String,
    /// Names of tools the model tried to call.
    pub tool_calls: Vec<String>,
}

/// Boundary to the model provider: one minimal chat exposing a single tool.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn probe(
        &self,
        model: &str,
        instruction: &str,
        tool_definition: Value,
    ) -> anyhow::Result<ProbeResponse>;
}

/// Background prober that classifies every registered tool against the
/// active model and records the verdicts on the registry's stats.
pub struct CompatibilityChecker {
    registry: Arc<ToolRegistry>,
    client: Arc<dyn ProbeClient>,
    model: RwLock<String>,
    provider: Provider,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl CompatibilityChecker {
    pub fn new(
        registry: Arc<ToolRegistry>,
        client: Arc<dyn ProbeClient>,
        model: impl Into<String>,
        config: &CompatConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            client,
            model: RwLock::new(model.into()),
            provider: Provider::OpenAi,
            interval: config.probe_interval(),
            task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn model(&self) -> String {
        match self.model.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Switch the active model. Every tool returns to `Unknown` for it.
    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        self.registry.stats().reset_compatibility(&model);
        match self.model.write() {
            Ok(mut guard) => *guard = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }

    /// Probe every tool whose state for the active model is unknown or
    /// stale. Exposed for tests and on-demand refreshes.
    pub async fn probe_all(&self) {
        let model = self.model();
        for tool in self.registry.get_tools() {
            let name = tool.name().to_string();
            let status = self.registry.get_tool_compatibility(&name, &model);
            let stale = self
                .registry
                .stats()
                .last_tested(&name, &model)
                .is_none_or(|tested| {
                    (Utc::now() - tested).to_std().unwrap_or(Duration::ZERO) > self.interval
                });
            if status != CompatStatus::Unknown && !stale {
                continue;
            }
            if self.shutdown.is_cancelled() {
                return;
            }

            self.registry
                .set_tool_compatibility(&name, &model, CompatStatus::Testing);
            let definition = providers::tool_definition(self.provider, tool.as_ref());
            let verdict = match self
                .client
                .probe(&model, PROBE_INSTRUCTION, definition)
                .await
            {
                Ok(response) => classify_response(&response),
                Err(err) => classify_error(&err.to_string()),
            };
            debug!(
                "compatibility: tool '{}' on model '{}' -> {:?}",
                name, model, verdict
            );
            self.registry.set_tool_compatibility(&name, &model, verdict);
        }
    }

    /// Spawn the periodic probe loop. No-op when already running or closed.
    pub fn start(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let checker = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let interval = self.interval;
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => checker.probe_all().await,
                }
            }
            debug!("compatibility checker stopped");
        }));
    }

    /// Stop the probe loop. Only the first call does any work.
    pub async fn stop(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Classify a successful probe chat.
///
/// Tool calls trump everything; otherwise the content is scanned for
/// decline markers before acceptance markers (several negatives, like
/// "cannot", contain a positive marker as a substring). An unclassifiable
/// response counts as supported: the model accepted the call.
fn classify_response(response: &ProbeResponse) -> CompatStatus {
    if !response.tool_calls.is_empty() {
        return CompatStatus::Supported;
    }
    let content = response.content.to_lowercase();
    if NEGATIVE_MARKERS.iter().any(|m| content.contains(m))
        || content.trim() == "no"
        || content.starts_with("no,")
        || content.starts_with("no ")
    {
        return CompatStatus::Unsupported;
    }
    if POSITIVE_MARKERS.iter().any(|m| content.contains(m)) {
        return CompatStatus::Supported;
    }
    CompatStatus::Supported
}

/// Classify a probe failure: a tool-support error means unsupported, any
/// other API error leaves the verdict unknown for a later retry.
fn classify_error(error: &str) -> CompatStatus {
    let error = error.to_lowercase();
    if TOOL_SUPPORT_ERRORS.iter().any(|m| error.contains(m)) {
        warn!("model rejected tool support: {}", error);
        CompatStatus::Unsupported
    } else {
        CompatStatus::Unknown
    }
}
