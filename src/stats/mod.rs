use crate::collections::RingBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// How many recent executions the tracker keeps for diagnostics.
const RECENT_WINDOW: usize = 256;

/// Per-(tool, model) compatibility verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatStatus {
    Unknown,
    Testing,
    Supported,
    Unsupported,
    Error,
}

/// Aggregated statistics for one tool.
#[derive(Debug, Clone)]
pub struct ToolStats {
    pub name: String,
    pub call_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_duration: Duration,
    pub avg_duration: Duration,
    pub last_called: Option<DateTime<Utc>>,
    /// Executions started but not yet finished.
    pub current_calls: u64,
    /// Verdict per model name.
    pub compatibility: HashMap<String, CompatStatus>,
    /// When each model was last probed.
    pub last_tested: HashMap<String, DateTime<Utc>>,
}

impl ToolStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            call_count: 0,
            success_count: 0,
            error_count: 0,
            total_duration: Duration::ZERO,
            avg_duration: Duration::ZERO,
            last_called: None,
            current_calls: 0,
            compatibility: HashMap::new(),
            last_tested: HashMap::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_calls > 0
    }
}

/// One finished execution, kept in the recent-events window.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub tool_name: String,
    pub success: bool,
    pub duration: Duration,
    pub at: DateTime<Utc>,
}

/// Tracks call/success/error/duration per tool plus per-model
/// compatibility, with a bounded window of recent executions.
///
/// Maintains `call_count = success_count + error_count + current_calls`:
/// `record_start` opens a call, `record_end` settles it.
pub struct StatsTracker {
    stats: Mutex<HashMap<String, ToolStats>>,
    recent: RingBuffer<ExecutionRecord>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
            recent: RingBuffer::new(RECENT_WINDOW),
        }
    }

    pub fn record_start(&self, tool: &str) {
        let mut stats = self.lock();
        let entry = stats
            .entry(tool.to_string())
            .or_insert_with(|| ToolStats::new(tool));
        entry.call_count += 1;
        entry.current_calls += 1;
        entry.last_called = Some(Utc::now());
    }

    pub fn record_end(&self, tool: &str, success: bool, duration: Duration) {
        let mut stats = self.lock();
        let entry = stats
            .entry(tool.to_string())
            .or_insert_with(|| ToolStats::new(tool));
        entry.current_calls = entry.current_calls.saturating_sub(1);
        if success {
            entry.success_count += 1;
        } else {
            entry.error_count += 1;
        }
        entry.total_duration += duration;
        if entry.call_count > 0 {
            entry.avg_duration = entry.total_duration / entry.call_count as u32;
        }
        drop(stats);
        self.recent.push(ExecutionRecord {
            tool_name: tool.to_string(),
            success,
            duration,
            at: Utc::now(),
        });
    }

    pub fn get(&self, tool: &str) -> Option<ToolStats> {
        self.lock().get(tool).cloned()
    }

    pub fn all(&self) -> Vec<ToolStats> {
        let mut all: Vec<ToolStats> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn reset(&self, tool: &str) {
        self.lock().remove(tool);
    }

    pub fn reset_all(&self) {
        self.lock().clear();
        self.recent.clear();
    }

    /// Newest-first window of finished executions.
    pub fn recent_executions(&self, n: usize) -> Vec<ExecutionRecord> {
        self.recent.get_recent(n)
    }

    pub fn set_compatibility(&self, tool: &str, model: &str, status: CompatStatus) {
        let mut stats = self.lock();
        let entry = stats
            .entry(tool.to_string())
            .or_insert_with(|| ToolStats::new(tool));
        entry.compatibility.insert(model.to_string(), status);
        entry.last_tested.insert(model.to_string(), Utc::now());
    }

    /// `Unknown` when the pair was never probed.
    pub fn compatibility(&self, tool: &str, model: &str) -> CompatStatus {
        self.lock()
            .get(tool)
            .and_then(|entry| entry.compatibility.get(model).copied())
            .unwrap_or(CompatStatus::Unknown)
    }

    pub fn last_tested(&self, tool: &str, model: &str) -> Option<DateTime<Utc>> {
        self.lock()
            .get(tool)
            .and_then(|entry| entry.last_tested.get(model).copied())
    }

    /// Drop every per-model verdict for `model`, returning those tools to
    /// `Unknown`.
    pub fn reset_compatibility(&self, model: &str) {
        let mut stats = self.lock();
        for entry in stats.values_mut() {
            entry.compatibility.remove(model);
            entry.last_tested.remove(model);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ToolStats>> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
