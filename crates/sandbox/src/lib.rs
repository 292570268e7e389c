//! Trellis sandbox — isolated execution of organization-authored hook code.
//!
//! Every evaluation gets a brand new V8 isolate with a hard heap ceiling, a
//! CPU budget enforced by a watchdog against the isolate thread's CPU
//! clock, and a host-side wall-clock race that also bounds time spent in
//! the fetch proxy. Isolates are never pooled or reused across hooks or
//! requests, and disposal happens on every exit path.
//!
//! Architecture:
//! - `eval`: the public evaluator and result envelope
//! - `isolate`: per-evaluation JsRuntime lifecycle on a dedicated thread
//! - `ops` + `shim.js`: the two-capability host bridge (fetch, log)
//! - `http`: size/time-capped HTTP client behind the fetch proxy
//! - `config`: environment-derived limits, read once at startup

pub mod config;
mod eval;
mod http;
mod isolate;
mod ops;
mod thread_clock;
mod watchdog;

pub use config::{EvalLimits, ResourceLimits, SandboxConfig};
pub use eval::{
    CLOUD_DISABLED_MESSAGE, ExecutionRequest, ExecutionResult, SandboxEvaluator,
    WALL_TIMEOUT_MESSAGE,
};
pub use http::{CappedHttpClient, FetchError, FetchOutcome, FetchRequest, HookHttpClient};
