//! Host-bridge ops exposed to hook code.
//!
//! Two capabilities cross the isolation boundary: a capped network fetch
//! proxy and a log sink. Both move plain data only — the fetch proxy
//! pre-reads the body to a string, and the shim stringifies log arguments
//! before they leave the isolate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use deno_core::{OpState, error::CoreError, op2};
use serde::Deserialize;

use crate::http::{FetchRequest, HookHttpClient};

/// Per-evaluation bridge state, installed into the runtime's `OpState`.
/// The log buffer is shared with the host so log lines survive a wall
/// timeout on the host side.
pub(crate) struct BridgeState {
    pub log: Arc<Mutex<Vec<String>>>,
    pub http: Arc<dyn HookHttpClient>,
    pub max_fetch_resp_size: u64,
    pub max_fetch_time_ms: u64,
}

/// Subset of fetch options the shim forwards.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct ShimFetchOptions {
    method: Option<String>,
    headers: Option<HashMap<String, String>>,
    body: Option<String>,
}

deno_core::extension!(
    hook_bridge,
    ops = [op_hook_log, op_hook_fetch],
);

pub(crate) fn init() -> deno_core::Extension {
    hook_bridge::init_ops()
}

/// Append one tagged line to the evaluation's log buffer. `parts` arrive
/// pre-stringified from the shim (stringification has to happen where
/// non-serializable values still exist).
#[op2]
fn op_hook_log(
    state: &mut OpState,
    #[string] level: String,
    #[serde] parts: Vec<String>,
) -> Result<(), CoreError> {
    let bridge = state.borrow::<BridgeState>();
    let mut buffer = bridge.log.lock().map_err(|_| {
        CoreError::from(std::io::Error::new(
            std::io::ErrorKind::Other,
            "Log buffer locked",
        ))
    })?;
    buffer.push(format!("[{}] {}", level, parts.join(" ")));
    Ok(())
}

/// Proxy one fetch call through the host's capped HTTP client. Failures are
/// reported as `{_error}` data rather than a thrown op error; the shim turns
/// that into a JS exception.
#[op2(async)]
#[serde]
async fn op_hook_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[serde] options: ShimFetchOptions,
) -> Result<serde_json::Value, CoreError> {
    let (http, max_size, max_time) = {
        let state = state.borrow();
        let bridge = state.borrow::<BridgeState>();
        (
            Arc::clone(&bridge.http),
            bridge.max_fetch_resp_size,
            bridge.max_fetch_time_ms,
        )
    };

    let request = FetchRequest {
        url,
        method: options.method.unwrap_or_else(|| "GET".to_string()),
        headers: options
            .headers
            .map(|headers| headers.into_iter().collect())
            .unwrap_or_default(),
        body: options.body,
    };

    match http.fetch(request, max_size, max_time).await {
        Ok(outcome) => Ok(serde_json::json!({
            "ok": outcome.ok,
            "status": outcome.status,
            "statusText": outcome.status_text,
            "_body": outcome.string_body,
        })),
        Err(err) => Ok(serde_json::json!({ "_error": err.to_string() })),
    }
}
