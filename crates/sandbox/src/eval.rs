//! The evaluator: compiles a caller-supplied function body inside a fresh
//! isolate, invokes it with copied arguments, and normalizes every outcome
//! into one result envelope. This function never returns `Err` — all
//! failure modes become `{ ok: false, error, log }`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::config::{EvalLimits, ResourceLimits, SandboxConfig};
use crate::http::{CappedHttpClient, HookHttpClient};
use crate::isolate::{EvalStats, IsolateJob, RunFailure, isolate_thread_main};

/// Returned when the subsystem is disabled in the shared multi-tenant cloud.
pub const CLOUD_DISABLED_MESSAGE: &str = "Custom hooks are not supported in Trellis Cloud";

/// Fixed message for the host-side wall-clock race losing to the timer.
pub const WALL_TIMEOUT_MESSAGE: &str = "Execution timed out";

const DEFAULT_ERROR_MESSAGE: &str = "Custom hook failed";

/// One evaluation: a function body (statements, not a full function — it is
/// wrapped as `async function({args...}) { ... }`), named arguments, and
/// optional limit overrides.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub function_body: String,
    /// Ordered name → value mapping; names become destructured bindings
    /// visible to the body.
    pub function_args: Vec<(String, serde_json::Value)>,
    pub limits: Option<EvalLimits>,
}

impl ExecutionRequest {
    pub fn new(function_body: impl Into<String>) -> Self {
        Self {
            function_body: function_body.into(),
            function_args: Vec::new(),
            limits: None,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.function_args.push((name.into(), value));
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = (String, serde_json::Value)>) -> Self {
        self.function_args.extend(args);
        self
    }

    pub fn limits(mut self, limits: EvalLimits) -> Self {
        self.limits = Some(limits);
        self
    }
}

/// Result envelope. `ok == true` implies `error` is `None`; `log` is always
/// present, newline-joined in call order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_val: Option<serde_json::Value>,
    pub log: String,
}

impl ExecutionResult {
    fn failure(error: String, log: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
            return_val: None,
            log,
        }
    }
}

/// Sandbox evaluator. Holds the process-wide configuration and the HTTP
/// client backing the fetch proxy; each call still gets its own isolate.
pub struct SandboxEvaluator {
    config: SandboxConfig,
    http: Arc<dyn HookHttpClient>,
}

impl SandboxEvaluator {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            http: Arc::new(CappedHttpClient::new()),
        }
    }

    /// Substitute the HTTP client — tests inject mocks here.
    pub fn with_http_client(config: SandboxConfig, http: Arc<dyn HookHttpClient>) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run one hook body to completion. Races the isolate-thread call
    /// against the wall-clock budget; the loser keeps running in the
    /// background until termination and is discarded, and the isolate is
    /// disposed on its own thread either way.
    pub async fn sandbox_eval(&self, request: ExecutionRequest) -> ExecutionResult {
        if self.config.multi_tenant_cloud {
            return ExecutionResult::failure(CLOUD_DISABLED_MESSAGE.to_string(), String::new());
        }

        let limits = self.config.limits.resolve(request.limits.as_ref());
        let eval_id = nanoid::nanoid!(10);
        tracing::debug!(
            eval_id = %eval_id,
            body_bytes = request.function_body.len(),
            args = request.function_args.len(),
            "starting hook evaluation"
        );

        let log = Arc::new(Mutex::new(Vec::new()));
        let job = IsolateJob {
            function_body: request.function_body,
            function_args: request.function_args,
            limits: limits.clone(),
            http: Arc::clone(&self.http),
            log: Arc::clone(&log),
        };

        let (handle_tx, mut handle_rx) = tokio::sync::oneshot::channel();
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name(format!("hook-isolate-{eval_id}"))
            .spawn(move || isolate_thread_main(job, handle_tx, result_tx));
        if let Err(err) = spawned {
            tracing::warn!(eval_id = %eval_id, "isolate thread spawn failed: {}", err);
            return ExecutionResult::failure(
                hook_error_message(&format!("isolate thread spawn failed: {err}")),
                drain_log(&log),
            );
        }

        let wall = Duration::from_millis(limits.wall_timeout_ms);
        tokio::select! {
            outcome = result_rx => match outcome {
                Ok((result, stats)) => finalize(&eval_id, result, stats, &log, &limits),
                Err(_) => {
                    tracing::warn!(eval_id = %eval_id, "isolate thread died before reporting");
                    ExecutionResult::failure(
                        hook_error_message("sandbox thread exited unexpectedly"),
                        drain_log(&log),
                    )
                }
            },
            _ = tokio::time::sleep(wall) => {
                // The isolate may still be running; terminate it so the
                // background thread can wind down and dispose the context.
                if let Ok(handle) = handle_rx.try_recv() {
                    handle.terminate_execution();
                }
                tracing::debug!(eval_id = %eval_id, wall_ms = limits.wall_timeout_ms, "hook evaluation hit wall timeout");
                ExecutionResult::failure(WALL_TIMEOUT_MESSAGE.to_string(), drain_log(&log))
            }
        }
    }
}

fn finalize(
    eval_id: &str,
    result: Result<serde_json::Value, RunFailure>,
    stats: EvalStats,
    log: &Arc<Mutex<Vec<String>>>,
    limits: &ResourceLimits,
) -> ExecutionResult {
    tracing::debug!(
        eval_id = %eval_id,
        ok = result.is_ok(),
        wall_ms = stats.wall.as_millis() as u64,
        cpu_ms = stats.cpu.map(|cpu| cpu.as_millis() as u64),
        heap_used_bytes = stats.heap_used_bytes,
        "hook evaluation finished"
    );

    let log = drain_log(log);
    match result {
        Ok(value) => ExecutionResult {
            ok: true,
            error: None,
            return_val: Some(value),
            log,
        },
        Err(failure) => {
            let error = match failure {
                RunFailure::WallTimeout => WALL_TIMEOUT_MESSAGE.to_string(),
                RunFailure::CpuTimeout => hook_error_message(&format!(
                    "Script execution timed out after {}ms of CPU time",
                    limits.cpu_timeout_ms
                )),
                RunFailure::MemoryLimit => hook_error_message(&format!(
                    "Isolate heap allocation failed ({}MB memory limit exceeded)",
                    limits.memory_limit_mb
                )),
                RunFailure::Compile(message)
                | RunFailure::Thrown(message)
                | RunFailure::Internal(message) => hook_error_message(&message),
            };
            ExecutionResult::failure(error, log)
        }
    }
}

fn hook_error_message(message: &str) -> String {
    if message.is_empty() {
        DEFAULT_ERROR_MESSAGE.to_string()
    } else {
        format!("Custom hook: {message}")
    }
}

fn drain_log(log: &Arc<Mutex<Vec<String>>>) -> String {
    log.lock()
        .map(|lines| lines.join("\n"))
        .unwrap_or_default()
}
