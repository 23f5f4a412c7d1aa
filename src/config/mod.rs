use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level runtime configuration.
///
/// All sections have serde defaults so a partial (or absent) config file
/// yields a fully usable runtime. Defaults are plain values — constructors
/// take a config explicitly, nothing reads global state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default, rename = "rateLimits")]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub permissions: PermissionConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub compat: CompatConfig,
    #[serde(default)]
    pub shell: ShellToolConfig,
}

/// Worker pool sizing and submission behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of pool workers. Values <= 0 fall back to the default of 4.
    #[serde(default = "default_workers")]
    pub workers: i64,
    /// How long `submit` blocks on a full job queue before giving up.
    #[serde(default = "default_submit_timeout_ms", rename = "submitTimeoutMs")]
    pub submit_timeout_ms: u64,
}

impl ExecutorConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers <= 0 {
            default_workers() as usize
        } else {
            self.workers as usize
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            submit_timeout_ms: default_submit_timeout_ms(),
        }
    }
}

/// Batch scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cap on tools running concurrently within one batch.
    #[serde(default = "default_max_concurrent", rename = "maxConcurrent")]
    pub max_concurrent: usize,
    /// Upper bound on a whole batch; request timeouts are clamped to this.
    #[serde(default = "default_batch_timeout_s", rename = "defaultTimeoutSeconds")]
    pub default_timeout_s: u64,
    /// Cadence at which dependency completion is polled.
    #[serde(default = "default_poll_interval_ms", rename = "pollIntervalMs")]
    pub poll_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_timeout_s: default_batch_timeout_s(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Token-bucket sizing for one scope (global, per-user, or per-resource).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default = "default_bucket_capacity")]
    pub capacity: f64,
    /// Tokens added per second.
    #[serde(default = "default_refill_rate", rename = "refillRate")]
    pub refill_rate: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: default_bucket_capacity(),
            refill_rate: default_refill_rate(),
        }
    }
}

/// Composed rate-limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub global: BucketConfig,
    #[serde(default, rename = "perUser")]
    pub per_user: BucketConfig,
    #[serde(default, rename = "perResource")]
    pub per_resource: BucketConfig,
    /// Janitor cadence for dropping idle sub-buckets.
    #[serde(default = "default_cleanup_interval_s", rename = "cleanupIntervalSeconds")]
    pub cleanup_interval_s: u64,
    /// Sub-buckets idle longer than this are collected.
    #[serde(default = "default_max_idle_s", rename = "maxIdleSeconds")]
    pub max_idle_s: u64,
}

impl RateLimitConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_s)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_s)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: BucketConfig::default(),
            per_user: BucketConfig::default(),
            per_resource: BucketConfig::default(),
            cleanup_interval_s: default_cleanup_interval_s(),
            max_idle_s: default_max_idle_s(),
        }
    }
}

/// Permission gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Path to the JSON allow-list. Absent or malformed files fall back to
    /// the built-in defaults.
    #[serde(default, rename = "allowlistPath")]
    pub allowlist_path: Option<PathBuf>,
    /// Short-circuit every check to allow. Test/escape hatch only.
    #[serde(default)]
    pub bypass: bool,
}

/// Progress broadcasting cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_broadcast_interval_ms", rename = "broadcastIntervalMs")]
    pub broadcast_interval_ms: u64,
}

impl ProgressConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: default_broadcast_interval_ms(),
        }
    }
}

/// Compatibility prober cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatConfig {
    #[serde(default = "default_probe_interval_s", rename = "probeIntervalSeconds")]
    pub probe_interval_s: u64,
}

impl CompatConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_s)
    }
}

impl Default for CompatConfig {
    fn default() -> Self {
        Self {
            probe_interval_s: default_probe_interval_s(),
        }
    }
}

/// Built-in shell tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellToolConfig {
    /// Per-command timeout in seconds.
    #[serde(default = "default_shell_timeout_s", rename = "timeoutSeconds")]
    pub timeout_s: u64,
    /// Optional working directory; tools resolve relative paths against it.
    #[serde(default, rename = "workingDir")]
    pub working_dir: Option<PathBuf>,
    /// When non-empty, every command in a pipeline must be listed here.
    #[serde(default, rename = "allowedCommands")]
    pub allowed_commands: Vec<String>,
    /// Confine file tools to the working directory.
    #[serde(default = "default_true", rename = "restrictToWorkspace")]
    pub restrict_to_workspace: bool,
}

impl ShellToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

impl Default for ShellToolConfig {
    fn default() -> Self {
        Self {
            timeout_s: default_shell_timeout_s(),
            working_dir: None,
            allowed_commands: Vec::new(),
            restrict_to_workspace: default_true(),
        }
    }
}

fn default_workers() -> i64 {
    4
}

fn default_submit_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrent() -> usize {
    10
}

fn default_batch_timeout_s() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_bucket_capacity() -> f64 {
    100.0
}

fn default_refill_rate() -> f64 {
    10.0
}

fn default_cleanup_interval_s() -> u64 {
    300
}

fn default_max_idle_s() -> u64 {
    1_800
}

fn default_broadcast_interval_ms() -> u64 {
    50
}

fn default_probe_interval_s() -> u64 {
    30
}

fn default_shell_timeout_s() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
