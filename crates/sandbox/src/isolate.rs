//! Isolate lifecycle for a single hook evaluation.
//!
//! V8 isolates are `!Send`, so everything here runs on a dedicated thread
//! with its own single-threaded tokio runtime. One evaluation gets one
//! fresh isolate; the isolate is dropped on every exit path before the
//! thread returns, and the heap-limit state outlives it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use deno_core::{JsRuntime, ModuleCodeString, PollEventLoopOptions, RuntimeOptions, serde_v8, v8};

use crate::config::ResourceLimits;
use crate::http::HookHttpClient;
use crate::ops::{self, BridgeState};
use crate::thread_clock::ThreadCpuClock;
use crate::watchdog::CpuWatchdog;

const SHIM_JS: &str = include_str!("shim.js");

/// Everything one evaluation needs inside the isolate thread.
pub(crate) struct IsolateJob {
    pub function_body: String,
    pub function_args: Vec<(String, serde_json::Value)>,
    pub limits: ResourceLimits,
    pub http: Arc<dyn HookHttpClient>,
    pub log: Arc<Mutex<Vec<String>>>,
}

/// How an isolate run ended, before envelope mapping.
#[derive(Debug)]
pub(crate) enum RunFailure {
    /// The wrapped hook function failed to compile.
    Compile(String),
    /// Hook code threw (or rejected, or returned something non-serializable).
    Thrown(String),
    /// The CPU watchdog terminated execution.
    CpuTimeout,
    /// The near-heap-limit callback terminated execution.
    MemoryLimit,
    /// The in-thread event-loop guard expired; the host-side race reports
    /// the same condition and normally wins first.
    WallTimeout,
    /// Plumbing failure on our side of the boundary.
    Internal(String),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EvalStats {
    pub wall: Duration,
    pub cpu: Option<Duration>,
    pub heap_used_bytes: usize,
}

pub(crate) type RunOutcome = (Result<serde_json::Value, RunFailure>, EvalStats);

/// Thread entry point: build a current-thread runtime and run the job to
/// completion. The isolate handle goes back to the host as soon as the
/// isolate exists so the wall-clock race can terminate a stuck run.
pub(crate) fn isolate_thread_main(
    job: IsolateJob,
    handle_tx: tokio::sync::oneshot::Sender<v8::IsolateHandle>,
    result_tx: tokio::sync::oneshot::Sender<RunOutcome>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            let stats = EvalStats {
                wall: Duration::ZERO,
                cpu: None,
                heap_used_bytes: 0,
            };
            let failure = RunFailure::Internal(format!("isolate runtime build failed: {err}"));
            if result_tx.send((Err(failure), stats)).is_err() {
                tracing::debug!("evaluation result receiver dropped");
            }
            return;
        }
    };

    let outcome = rt.block_on(run_job(job, handle_tx));
    if result_tx.send(outcome).is_err() {
        // The host already reported a wall timeout and moved on.
        tracing::debug!("evaluation result receiver dropped");
    }
}

async fn run_job(
    job: IsolateJob,
    handle_tx: tokio::sync::oneshot::Sender<v8::IsolateHandle>,
) -> RunOutcome {
    let started = Instant::now();
    let stats_clock = ThreadCpuClock::for_current_thread();
    let cpu_start = stats_clock.as_ref().map(|clock| clock.elapsed_cpu());

    let mut runtime = create_runtime(&job);
    let _ = handle_tx.send(runtime.v8_isolate().thread_safe_handle());

    // The callback state must outlive the isolate: V8 may invoke the
    // callback at any point while JS runs, so the runtime is dropped
    // explicitly below, before `heap_state` goes out of scope.
    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    if job.limits.memory_limit_mb > 0 {
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
        );
    }

    let cpu_fired = Arc::new(AtomicBool::new(false));
    let result = drive(&mut runtime, &job, &cpu_fired).await;

    let heap_used_bytes = runtime.v8_isolate().get_heap_statistics().used_heap_size();
    drop(runtime);

    // Terminations leave a generic "execution terminated" error behind;
    // the flags say what actually happened.
    let result = if heap_state.triggered.load(Ordering::SeqCst) {
        Err(RunFailure::MemoryLimit)
    } else if cpu_fired.load(Ordering::SeqCst) {
        Err(RunFailure::CpuTimeout)
    } else {
        result
    };

    let cpu = match (stats_clock, cpu_start) {
        (Some(clock), Some(start)) => Some(clock.elapsed_cpu().saturating_sub(start)),
        _ => None,
    };
    let stats = EvalStats {
        wall: started.elapsed(),
        cpu,
        heap_used_bytes,
    };
    (result, stats)
}

fn create_runtime(job: &IsolateJob) -> JsRuntime {
    let heap_bytes = (job.limits.memory_limit_mb as usize).saturating_mul(1024 * 1024);
    let create_params = if heap_bytes > 0 {
        Some(v8::CreateParams::default().heap_limits(0, heap_bytes))
    } else {
        None
    };

    let runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![ops::init()],
        create_params,
        ..Default::default()
    });

    runtime.op_state().borrow_mut().put(BridgeState {
        log: Arc::clone(&job.log),
        http: Arc::clone(&job.http),
        max_fetch_resp_size: job.limits.max_fetch_resp_size,
        max_fetch_time_ms: job.limits.wall_timeout_ms,
    });

    runtime
}

/// Shim, compile, invoke, pump. The CPU watchdog covers only the hook
/// function itself — armed right before the invoke script, disarmed once
/// the event loop settles.
async fn drive(
    runtime: &mut JsRuntime,
    job: &IsolateJob,
    cpu_fired: &Arc<AtomicBool>,
) -> Result<serde_json::Value, RunFailure> {
    runtime
        .execute_script("hook:shim.js", ModuleCodeString::from(SHIM_JS))
        .map_err(|err| RunFailure::Internal(format!("shim bootstrap failed: {err}")))?;

    let bindings = job
        .function_args
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let compiled = format!(
        "globalThis.__hookFn = async function({{ {} }}) {{\n{}\n}};",
        bindings, job.function_body
    );
    runtime
        .execute_script("hook:compile.js", ModuleCodeString::from(compiled))
        .map_err(|err| RunFailure::Compile(err.to_string()))?;

    // Arguments cross the boundary as JSON text and are rebuilt inside the
    // isolate — a deep copy, never a live reference.
    let mut args = serde_json::Map::new();
    for (name, value) in &job.function_args {
        args.insert(name.clone(), value.clone());
    }
    let args_json = serde_json::to_string(&serde_json::Value::Object(args))
        .map_err(|err| RunFailure::Internal(format!("arguments not serializable: {err}")))?;
    let args_literal = serde_json::to_string(&args_json)
        .map_err(|err| RunFailure::Internal(format!("arguments not serializable: {err}")))?;
    let invoke = format!("globalThis.__hookFn(JSON.parse({args_literal}));");

    let watchdog = match ThreadCpuClock::for_current_thread() {
        Some(clock) => Some(CpuWatchdog::arm(
            clock,
            runtime.v8_isolate().thread_safe_handle(),
            Duration::from_millis(job.limits.cpu_timeout_ms),
            Arc::clone(cpu_fired),
        )),
        None => {
            tracing::warn!("thread CPU clock unavailable, CPU budget not enforced");
            None
        }
    };

    // The async function body runs synchronously up to its first await, so
    // the invoke script itself is where a CPU-bound loop spins.
    let result = match runtime.execute_script("hook:invoke.js", ModuleCodeString::from(invoke)) {
        Ok(value) => value,
        Err(err) => {
            if let Some(watchdog) = watchdog {
                watchdog.disarm();
            }
            return Err(RunFailure::Thrown(err.to_string()));
        }
    };

    // Pending ops (fetch) resolve here. Bounded by the wall budget so a
    // stuck op future cannot keep this thread alive past the host's race.
    let wall = Duration::from_millis(job.limits.wall_timeout_ms);
    let pumped = tokio::time::timeout(
        wall,
        runtime.run_event_loop(PollEventLoopOptions::default()),
    )
    .await;
    if let Some(watchdog) = watchdog {
        watchdog.disarm();
    }
    match pumped {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(RunFailure::Thrown(err.to_string())),
        Err(_) => return Err(RunFailure::WallTimeout),
    }

    resolve_result(runtime, result)
}

fn resolve_result(
    runtime: &mut JsRuntime,
    result: v8::Global<v8::Value>,
) -> Result<serde_json::Value, RunFailure> {
    deno_core::scope!(scope, runtime);
    let local = v8::Local::new(scope, &result);

    let settled: Result<v8::Local<v8::Value>, RunFailure> =
        if let Ok(promise) = v8::Local::<v8::Promise>::try_from(local) {
            match promise.state() {
                v8::PromiseState::Fulfilled => Ok(promise.result(scope)),
                v8::PromiseState::Rejected => {
                    let reason = promise.result(scope);
                    Err(RunFailure::Thrown(exception_message(scope, reason)))
                }
                v8::PromiseState::Pending => Err(RunFailure::Thrown(
                    "Hook promise never settled".to_string(),
                )),
            }
        } else {
            Ok(local)
        };
    let value = settled?;

    serde_v8::from_v8::<serde_json::Value>(scope, value)
        .map_err(|err| RunFailure::Thrown(format!("Hook returned a non-serializable value: {err}")))
}

/// Prefer the exception's `message` property; `toString()` on an Error
/// prepends the class name, which would leak into retry comparisons.
fn exception_message(scope: &mut v8::HandleScope, exception: v8::Local<v8::Value>) -> String {
    if let Ok(object) = v8::Local::<v8::Object>::try_from(exception) {
        if let Some(key) = v8::String::new(scope, "message") {
            if let Some(message) = object.get(scope, key.into()) {
                if message.is_string() {
                    return message.to_rust_string_lossy(scope);
                }
            }
        }
    }
    exception.to_rust_string_lossy(scope)
}

struct HeapLimitState {
    handle: v8::IsolateHandle,
    /// AtomicBool so the callback works through a shared reference even if
    /// V8 re-enters it.
    triggered: AtomicBool,
}

/// Near-heap-limit callback: terminate execution instead of letting V8
/// abort the process, and grant 1MB of grace so the termination can
/// propagate.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the Box<HeapLimitState> in `run_job`, which
    // stays alive until after the runtime (and with it the isolate) has
    // been dropped, and V8 only calls this while the isolate is alive.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}
