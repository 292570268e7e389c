//! End-to-end evaluator tests against the real V8 engine.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use trellis_sandbox::{
    CLOUD_DISABLED_MESSAGE, EvalLimits, ExecutionRequest, FetchError, FetchOutcome, FetchRequest,
    HookHttpClient, SandboxConfig, SandboxEvaluator, WALL_TIMEOUT_MESSAGE,
};

/// Scripted HTTP client: canned body, optional delay, optional error, and a
/// record of every call with the caps it was given.
struct MockHttpClient {
    body: String,
    delay: Duration,
    error: Option<String>,
    calls: Mutex<Vec<(String, u64, u64)>>,
}

impl MockHttpClient {
    fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            delay: Duration::ZERO,
            error: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    fn calls(&self) -> Vec<(String, u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HookHttpClient for MockHttpClient {
    async fn fetch(
        &self,
        request: FetchRequest,
        max_content_size: u64,
        max_time_ms: u64,
    ) -> Result<FetchOutcome, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.url.clone(), max_content_size, max_time_ms));
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.error {
            return Err(FetchError::Transport(message.clone()));
        }
        let cap = max_content_size as usize;
        let truncated = self.body.len() > cap;
        let body = if truncated {
            self.body[..cap].to_string()
        } else {
            self.body.clone()
        };
        Ok(FetchOutcome {
            ok: true,
            status: 200,
            status_text: "OK".to_string(),
            string_body: body,
            truncated,
        })
    }
}

fn evaluator() -> SandboxEvaluator {
    SandboxEvaluator::new(SandboxConfig::default())
}

fn evaluator_with(http: Arc<MockHttpClient>) -> SandboxEvaluator {
    SandboxEvaluator::with_http_client(SandboxConfig::default(), http)
}

#[tokio::test]
async fn returns_the_computed_value() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new("return num + 1;").arg("num", json!(2)))
        .await;
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.return_val, Some(json!(3)));
    assert_eq!(result.log, "");
}

#[tokio::test]
async fn undefined_return_is_null() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new("const x = 1;"))
        .await;
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.return_val, Some(serde_json::Value::Null));
}

#[tokio::test]
async fn surfaces_syntax_errors() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new("invalid code"))
        .await;
    assert!(!result.ok);
    let error = result.error.expect("error message");
    assert!(error.contains("identifier"), "got: {error}");
    assert_eq!(result.log, "");
}

#[tokio::test]
async fn surfaces_thrown_errors() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new("throw new Error('Test error')"))
        .await;
    assert!(!result.ok);
    let error = result.error.expect("error message");
    assert!(error.contains("Test error"), "got: {error}");
    assert_eq!(result.log, "");
}

#[tokio::test]
async fn cpu_bound_loop_hits_the_cpu_budget() {
    let started = Instant::now();
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new("while (true) {}").limits(EvalLimits {
            cpu_timeout_ms: Some(5),
            ..Default::default()
        }))
        .await;
    let elapsed = started.elapsed();

    assert!(!result.ok);
    let error = result.error.expect("error message");
    assert!(error.contains("timed out"), "got: {error}");
    assert_eq!(result.log, "");
    // The CPU budget, not the 5s default wall budget, must end this run.
    assert!(elapsed < Duration::from_millis(2_500), "took {elapsed:?}");
}

#[tokio::test]
async fn allocation_loop_hits_the_memory_limit() {
    let result = evaluator()
        .sandbox_eval(
            ExecutionRequest::new(
                r#"
                const chunks = [];
                while (true) {
                    chunks.push(new Array(100000).fill("x"));
                }
                "#,
            )
            .limits(EvalLimits {
                memory_limit_mb: Some(8),
                // Allocation burns CPU; leave room so the heap limit wins.
                cpu_timeout_ms: Some(5_000),
                wall_timeout_ms: Some(20_000),
                ..Default::default()
            }),
        )
        .await;

    assert!(!result.ok);
    let error = result.error.expect("error message");
    assert!(error.contains("allocation failed"), "got: {error}");
}

#[tokio::test]
async fn log_lines_are_tagged_and_ordered() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new(
            r#"console.log("a"); console.log("b"); return true;"#,
        ))
        .await;
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.log, "[log] a\n[log] b");
}

#[tokio::test]
async fn log_levels_and_values_are_stringified() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new(
            r#"
            console.error("boom", { code: 7 });
            console.debug("state", [1, 2]);
            return null;
            "#,
        ))
        .await;
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.log, "[error] boom {\"code\":7}\n[debug] state [1,2]");
}

#[tokio::test]
async fn log_survives_a_failing_hook() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new(
            r#"console.log("about to fail"); throw new Error("nope");"#,
        ))
        .await;
    assert!(!result.ok);
    assert_eq!(result.log, "[log] about to fail");
}

#[tokio::test]
async fn cloud_gate_short_circuits_without_side_effects() {
    let http = Arc::new(MockHttpClient::with_body("unreachable"));
    let evaluator = SandboxEvaluator::with_http_client(
        SandboxConfig {
            multi_tenant_cloud: true,
            ..Default::default()
        },
        Arc::clone(&http) as Arc<dyn HookHttpClient>,
    );

    let started = Instant::now();
    let result = evaluator
        .sandbox_eval(ExecutionRequest::new(r#"await fetch("https://x/"); return 1;"#))
        .await;

    assert!(!result.ok);
    assert_eq!(result.error.as_deref(), Some(CLOUD_DISABLED_MESSAGE));
    assert_eq!(result.log, "");
    assert!(http.calls().is_empty(), "no isolate, no bridge traffic");
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn fetch_round_trip_through_the_shim() {
    let http = Arc::new(MockHttpClient::with_body(r#"{"flag": true, "items": [1, 2, 3]}"#));
    let evaluator = evaluator_with(Arc::clone(&http));

    let result = evaluator
        .sandbox_eval(
            ExecutionRequest::new(
                r#"
                const response = await fetch("https://flags.example/payload");
                if (!response.ok) { throw new Error("unexpected status " + response.status); }
                const data = await response.json();
                return [data.flag, data.items.length, response.status, response.statusText];
                "#,
            )
            .limits(EvalLimits {
                max_fetch_resp_size: Some(2_048),
                ..Default::default()
            }),
        )
        .await;

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.return_val, Some(json!([true, 3, 200, "OK"])));

    let calls = http.calls();
    assert_eq!(calls.len(), 1);
    let (url, max_size, max_time) = &calls[0];
    assert_eq!(url, "https://flags.example/payload");
    assert_eq!(*max_size, 2_048, "per-call size cap reaches the client");
    assert_eq!(*max_time, 5_000, "fetch time is bounded by the wall budget");
}

#[tokio::test]
async fn fetch_body_is_truncated_at_the_cap() {
    let http = Arc::new(MockHttpClient::with_body("x".repeat(2_000)));
    let evaluator = evaluator_with(Arc::clone(&http));

    let result = evaluator
        .sandbox_eval(
            ExecutionRequest::new(
                r#"
                const response = await fetch("https://big.example/");
                const text = await response.text();
                return text;
                "#,
            )
            .limits(EvalLimits {
                max_fetch_resp_size: Some(100),
                ..Default::default()
            }),
        )
        .await;

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.return_val, Some(json!("x".repeat(100))));
}

#[tokio::test]
async fn fetch_errors_become_js_exceptions() {
    let http = Arc::new(MockHttpClient::with_body("").failing("connection reset"));
    let evaluator = evaluator_with(Arc::clone(&http));

    let result = evaluator
        .sandbox_eval(ExecutionRequest::new(
            r#"
            try {
                await fetch("https://down.example/");
                return "unreachable";
            } catch (err) {
                return err.message;
            }
            "#,
        ))
        .await;

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    let message = result.return_val.expect("return value");
    assert!(
        message.as_str().expect("string").contains("connection reset"),
        "got: {message}"
    );
}

#[tokio::test]
async fn slow_fetch_is_bounded_by_wall_not_cpu() {
    // Near-zero CPU while blocked on the bridge: the CPU budget must not
    // fire, and the call completes well inside the wall budget.
    let http = Arc::new(MockHttpClient::with_body("ok").delayed(Duration::from_millis(300)));
    let evaluator = evaluator_with(Arc::clone(&http));

    let result = evaluator
        .sandbox_eval(
            ExecutionRequest::new(
                r#"
                const response = await fetch("https://slow.example/");
                return await response.text();
                "#,
            )
            .limits(EvalLimits {
                cpu_timeout_ms: Some(50),
                ..Default::default()
            }),
        )
        .await;

    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.return_val, Some(json!("ok")));
}

#[tokio::test]
async fn wall_timeout_fires_during_a_pending_fetch() {
    let http = Arc::new(MockHttpClient::with_body("late").delayed(Duration::from_secs(30)));
    let evaluator = evaluator_with(Arc::clone(&http));

    let started = Instant::now();
    let result = evaluator
        .sandbox_eval(
            ExecutionRequest::new(
                r#"
                console.log("before fetch");
                await fetch("https://stuck.example/");
                return "unreachable";
                "#,
            )
            .limits(EvalLimits {
                wall_timeout_ms: Some(300),
                ..Default::default()
            }),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(!result.ok);
    assert_eq!(result.error.as_deref(), Some(WALL_TIMEOUT_MESSAGE));
    // Lines logged before the stall still reach the caller.
    assert_eq!(result.log, "[log] before fetch");
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
}

#[tokio::test]
async fn code_generation_primitives_are_unreachable() {
    let result = evaluator()
        .sandbox_eval(ExecutionRequest::new(
            r#"
            return [
                typeof globalThis.Deno,
                typeof globalThis.eval,
                String(console.log.constructor),
            ];
            "#,
        ))
        .await;
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(
        result.return_val,
        Some(json!(["undefined", "undefined", "undefined"]))
    );
}

#[tokio::test]
async fn arguments_cross_the_boundary_by_value() {
    let payload = json!({ "name": "checkout", "tags": ["a", "b"] });
    let result = evaluator()
        .sandbox_eval(
            ExecutionRequest::new(
                r#"
                feature.tags.push("mutated");
                return feature.tags.length;
                "#,
            )
            .arg("feature", payload.clone()),
        )
        .await;
    assert!(result.ok, "unexpected failure: {:?}", result.error);
    assert_eq!(result.return_val, Some(json!(3)));
    // The host copy is untouched; only the isolate's copy was mutated.
    assert_eq!(payload["tags"], json!(["a", "b"]));
}
