use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Build config for a named profile (empty string = default). With a
    /// profile such as `PROD`, every key is first looked up as
    /// `{PROFILE}_{KEY}`, falling back to `{KEY}`. Call `load_dotenv()` first.
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            health: HealthConfig::from_env_profiled(p),
            transport: TransportConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  server:     host={}, public_port={}, private_port={}, shutdown_grace={}s",
            self.server.host,
            self.server.public_port,
            self.server.private_port,
            self.server.shutdown_grace_secs
        );
        tracing::info!(
            "  scheduler:  dispatch_interval={}ms, default_window={}, err_threshold={}, selection={}",
            self.scheduler.dispatch_interval_ms,
            self.scheduler.default_window,
            self.scheduler.err_subtask_threshold,
            self.scheduler.worker_selection
        );
        tracing::info!(
            "  health:     interval={}s, failure_threshold={}, status_poll={}s",
            self.health.check_interval_secs,
            self.health.failure_threshold,
            self.health.status_poll_interval_secs
        );
        tracing::info!(
            "  transport:  timeout={}s, notify_retries={}, notify_backoff={}ms",
            self.transport.timeout_secs,
            self.transport.notify_retries,
            self.transport.notify_backoff_ms
        );
    }

    /// Return a JSON view of the effective configuration.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": {
                "host": self.server.host,
                "public_port": self.server.public_port,
                "private_port": self.server.private_port,
            },
            "scheduler": {
                "dispatch_interval_ms": self.scheduler.dispatch_interval_ms,
                "default_window": self.scheduler.default_window,
                "err_subtask_threshold": self.scheduler.err_subtask_threshold,
                "worker_selection": self.scheduler.worker_selection.to_string(),
            },
            "health": {
                "check_interval_secs": self.health.check_interval_secs,
                "failure_threshold": self.health.failure_threshold,
                "status_poll_interval_secs": self.health.status_poll_interval_secs,
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// Port for the node-facing API.
    pub public_port: u16,
    /// Port for the health endpoint.
    pub private_port: u16,
    /// Upper bound on graceful shutdown of in-flight requests.
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            public_port: profiled_env_u16(p, "PUBLIC_PORT", 8080),
            private_port: profiled_env_u16(p, "PRIVATE_PORT", 8081),
            shutdown_grace_secs: profiled_env_u64(p, "SHUTDOWN_GRACE_SECS", 5),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Order in which free workers are offered windows on a dispatch tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerSelection {
    /// Longest-idle worker first.
    #[default]
    Fifo,
    /// Lexical order of worker ids.
    ById,
}

impl std::fmt::Display for WorkerSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerSelection::Fifo => write!(f, "fifo"),
            WorkerSelection::ById => write!(f, "by_id"),
        }
    }
}

impl std::str::FromStr for WorkerSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(WorkerSelection::Fifo),
            "by_id" | "by-id" | "id" => Ok(WorkerSelection::ById),
            other => Err(format!("unknown worker selection '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period of each per-task dispatch loop.
    pub dispatch_interval_ms: u64,
    /// Window size for workers that declare no capacity.
    pub default_window: u64,
    /// A subtask may fail this many times and still be reassigned.
    pub err_subtask_threshold: u32,
    pub worker_selection: WorkerSelection,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: 5000,
            default_window: 50,
            err_subtask_threshold: 3,
            worker_selection: WorkerSelection::Fifo,
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        let worker_selection = match profiled_env_opt(p, "WORKER_SELECTION") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("{}; falling back to {}", e, defaults.worker_selection);
                defaults.worker_selection
            }),
            None => defaults.worker_selection,
        };
        Self {
            dispatch_interval_ms: profiled_env_u64(p, "DISPATCH_INTERVAL_MS", defaults.dispatch_interval_ms),
            default_window: profiled_env_u64(p, "DEFAULT_WINDOW", defaults.default_window),
            err_subtask_threshold: profiled_env_u32(p, "ERR_SUBTASK_THRESHOLD", defaults.err_subtask_threshold),
            worker_selection,
        }
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(1))
    }
}

// ── Health ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub check_interval_secs: u64,
    /// Consecutive failed probes before eviction (1 = fail-fast).
    pub failure_threshold: u32,
    /// Worker status polling period (0 = disabled).
    pub status_poll_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            failure_threshold: 1,
            status_poll_interval_secs: 0,
        }
    }
}

impl HealthConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            check_interval_secs: profiled_env_u64(p, "HEALTH_CHECK_INTERVAL_SECS", defaults.check_interval_secs),
            failure_threshold: profiled_env_u32(p, "HEALTH_FAILURE_THRESHOLD", defaults.failure_threshold).max(1),
            status_poll_interval_secs: profiled_env_u64(
                p,
                "STATUS_POLL_INTERVAL_SECS",
                defaults.status_poll_interval_secs,
            ),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn status_poll_interval(&self) -> Option<Duration> {
        (self.status_poll_interval_secs > 0).then(|| Duration::from_secs(self.status_poll_interval_secs))
    }
}

// ── Outbound transport ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    /// Extra attempts for owner notifications after the first one fails.
    pub notify_retries: u32,
    /// Base delay, doubled per attempt.
    pub notify_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            notify_retries: 3,
            notify_backoff_ms: 200,
        }
    }
}

impl TransportConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: profiled_env_u64(p, "HTTP_TIMEOUT_SECS", defaults.timeout_secs),
            notify_retries: profiled_env_u32(p, "NOTIFY_RETRIES", defaults.notify_retries),
            notify_backoff_ms: profiled_env_u64(p, "NOTIFY_BACKOFF_MS", defaults.notify_backoff_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.notify_backoff_ms.saturating_mul(factor))
    }
}
