//! Seams to the surrounding application: hook storage, entitlements, and
//! the permission-elevated view used to load hooks.

use std::sync::Arc;

use async_trait::async_trait;
use trellis_sandbox::SandboxEvaluator;

use crate::definition::{HookDefinition, HookType};

#[async_trait]
pub trait HookStore: Send + Sync {
    /// Hooks matching `hook_type` whose project scope is empty or equals
    /// `project`, in store order. The runner executes them in exactly this
    /// order.
    async fn get_by_hook(&self, hook_type: HookType, project: &str) -> Vec<HookDefinition>;

    /// Success telemetry. Fire-and-forget; must never fail the run.
    fn log_success(&self, hook: &HookDefinition);

    /// Failure telemetry. Fire-and-forget; must never fail the run.
    fn log_failure(&self, hook: &HookDefinition);
}

/// Resolves the permission-elevated store view for an organization.
///
/// Hook execution is a system-level integrity check, not a user action:
/// which hooks fire must not depend on which user triggered the write, so
/// loading always goes through this elevated view.
pub trait ContextResolver: Send + Sync {
    fn admin_store(&self, org_id: &str) -> Arc<dyn HookStore>;
}

pub trait Entitlements: Send + Sync {
    fn has_premium_feature(&self, org_id: &str, feature: &str) -> bool;
}

/// Per-organization execution context, assembled by the calling write path.
pub struct OrgContext {
    pub org_id: String,
    pub evaluator: Arc<SandboxEvaluator>,
    pub resolver: Arc<dyn ContextResolver>,
    pub entitlements: Arc<dyn Entitlements>,
}
