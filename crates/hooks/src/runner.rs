//! Hook runner: loads the hooks for one hook type, executes them strictly
//! in store order, applies the retry-against-prior-state policy, and fails
//! the run on the first hook that cannot be excused. Remaining hooks in
//! that run are skipped, not just unreported.

use serde_json::Value;
use thiserror::Error;

use trellis_sandbox::{ExecutionRequest, ExecutionResult};

use crate::definition::{HookDefinition, HookType};
use crate::store::{HookStore, OrgContext};

/// Premium capability gating the whole subsystem per organization.
pub const CUSTOM_HOOKS_FEATURE: &str = "custom-hooks";

#[derive(Debug, Error)]
pub enum HookError {
    /// A hook rejected the change. The message is user-facing: the hook's
    /// error plus its captured log output, surfaced verbatim by the write
    /// path that triggered validation.
    #[error("{message}")]
    Rejected { hook_id: String, message: String },

    #[error("hook arguments not serializable: {0}")]
    Args(#[from] serde_json::Error),
}

pub(crate) async fn run_custom_hooks(
    ctx: &OrgContext,
    hook_type: HookType,
    project: &str,
    function_args: &[(String, Value)],
    original_function_args: Option<&[(String, Value)]>,
) -> Result<(), HookError> {
    // Disabled outright in the shared multi-tenant cloud; the store is not
    // even consulted.
    if ctx.evaluator.config().multi_tenant_cloud {
        return Ok(());
    }
    if !ctx
        .entitlements
        .has_premium_feature(&ctx.org_id, CUSTOM_HOOKS_FEATURE)
    {
        tracing::debug!(org = %ctx.org_id, "custom hooks not entitled, skipping");
        return Ok(());
    }

    let store = ctx.resolver.admin_store(&ctx.org_id);
    let hooks = store.get_by_hook(hook_type, project).await;
    if hooks.is_empty() {
        return Ok(());
    }
    tracing::debug!(
        org = %ctx.org_id,
        hook_type = %hook_type,
        hooks = hooks.len(),
        "running validation hooks"
    );

    for hook in &hooks {
        let result = run_custom_hook(
            ctx,
            store.as_ref(),
            hook,
            function_args,
            original_function_args,
        )
        .await;
        if !result.ok {
            let error = result
                .error
                .unwrap_or_else(|| "Custom hook failed".to_string());
            let message = if result.log.is_empty() {
                error
            } else {
                format!("{error}\n\nHook log:\n{}", result.log)
            };
            tracing::warn!(
                org = %ctx.org_id,
                hook = %hook.id,
                "validation hook rejected the change"
            );
            return Err(HookError::Rejected {
                hook_id: hook.id.clone(),
                message,
            });
        }
    }

    Ok(())
}

async fn run_custom_hook(
    ctx: &OrgContext,
    store: &dyn HookStore,
    hook: &HookDefinition,
    function_args: &[(String, Value)],
    original_function_args: Option<&[(String, Value)]>,
) -> ExecutionResult {
    let result = ctx.evaluator.sandbox_eval(request_for(hook, function_args)).await;
    if result.ok {
        store.log_success(hook);
        return result;
    }
    store.log_failure(hook);

    // A hook that was already failing identically before the change did not
    // reject this change. Forgiveness requires the exact same error string;
    // a hook that fails differently before and after is not excused.
    if hook.incremental_changes_only {
        if let Some(original_args) = original_function_args {
            let prior = ctx
                .evaluator
                .sandbox_eval(request_for(hook, original_args))
                .await;
            if !prior.ok && prior.error == result.error {
                tracing::debug!(hook = %hook.id, "pre-existing failure, hook excused");
                return ExecutionResult { ok: true, ..result };
            }
        }
    }

    result
}

fn request_for(hook: &HookDefinition, args: &[(String, Value)]) -> ExecutionRequest {
    ExecutionRequest::new(hook.code.clone()).args(args.iter().cloned())
}
