//! Sandbox configuration.
//!
//! Resource limits come from the environment exactly once, at process start,
//! and travel by value from there on. Nothing in the evaluator re-reads the
//! environment per call.

const DEFAULT_MEMORY_LIMIT_MB: u64 = 32;
const DEFAULT_CPU_TIMEOUT_MS: u64 = 100;
const DEFAULT_WALL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_FETCH_RESP_SIZE: u64 = 500 * 1024;

/// Process-wide resource limits for hook evaluations.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// V8 heap ceiling in megabytes.
    pub memory_limit_mb: u64,
    /// Budget for active computation inside the isolate, in milliseconds.
    pub cpu_timeout_ms: u64,
    /// Host-side wall-clock budget for the whole evaluation, in milliseconds.
    pub wall_timeout_ms: u64,
    /// Maximum bytes kept from a fetch response body.
    pub max_fetch_resp_size: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            cpu_timeout_ms: DEFAULT_CPU_TIMEOUT_MS,
            wall_timeout_ms: DEFAULT_WALL_TIMEOUT_MS,
            max_fetch_resp_size: DEFAULT_MAX_FETCH_RESP_SIZE,
        }
    }
}

impl ResourceLimits {
    /// Read limits from the environment.
    ///
    /// Environment variables:
    /// - CUSTOM_HOOK_MEMORY_MB: heap ceiling in MB (default: 32)
    /// - CUSTOM_HOOK_CPU_TIMEOUT_MS: CPU budget in ms (default: 100)
    /// - CUSTOM_HOOK_WALL_TIMEOUT_MS: wall budget in ms (default: 5000)
    /// - CUSTOM_HOOK_MAX_FETCH_RESP_SIZE: fetch body cap in bytes (default: 512000)
    ///
    /// Values must parse as non-negative integers; anything else falls back
    /// to the default.
    pub fn from_env() -> Self {
        Self {
            memory_limit_mb: env_u64("CUSTOM_HOOK_MEMORY_MB", DEFAULT_MEMORY_LIMIT_MB),
            cpu_timeout_ms: env_u64("CUSTOM_HOOK_CPU_TIMEOUT_MS", DEFAULT_CPU_TIMEOUT_MS),
            wall_timeout_ms: env_u64("CUSTOM_HOOK_WALL_TIMEOUT_MS", DEFAULT_WALL_TIMEOUT_MS),
            max_fetch_resp_size: env_u64(
                "CUSTOM_HOOK_MAX_FETCH_RESP_SIZE",
                DEFAULT_MAX_FETCH_RESP_SIZE,
            ),
        }
    }

    /// Apply per-call overrides on top of the process-wide limits.
    pub fn resolve(&self, overrides: Option<&EvalLimits>) -> ResourceLimits {
        let Some(overrides) = overrides else {
            return self.clone();
        };
        ResourceLimits {
            memory_limit_mb: overrides.memory_limit_mb.unwrap_or(self.memory_limit_mb),
            cpu_timeout_ms: overrides.cpu_timeout_ms.unwrap_or(self.cpu_timeout_ms),
            wall_timeout_ms: overrides.wall_timeout_ms.unwrap_or(self.wall_timeout_ms),
            max_fetch_resp_size: overrides
                .max_fetch_resp_size
                .unwrap_or(self.max_fetch_resp_size),
        }
    }
}

/// Optional per-evaluation limit overrides. Each field independently
/// replaces the process-wide value when set.
#[derive(Debug, Clone, Default)]
pub struct EvalLimits {
    pub memory_limit_mb: Option<u64>,
    pub cpu_timeout_ms: Option<u64>,
    pub wall_timeout_ms: Option<u64>,
    pub max_fetch_resp_size: Option<u64>,
}

/// Top-level sandbox configuration.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    /// Set when this process serves the shared multi-tenant cloud. The
    /// sandbox stays compiled in but behaviorally disabled: isolation is
    /// judged adequate for self-hosted tenants only.
    pub multi_tenant_cloud: bool,
    pub limits: ResourceLimits,
}

impl SandboxConfig {
    /// Read the full sandbox configuration from the environment.
    ///
    /// `TRELLIS_CLOUD` marks a multi-tenant cloud deployment ("false"/"0"
    /// are treated as unset).
    pub fn from_env() -> Self {
        Self {
            multi_tenant_cloud: std::env::var("TRELLIS_CLOUD")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(false),
            limits: ResourceLimits::from_env(),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
