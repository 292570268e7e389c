//! Organization-authored hook definitions.

use serde::{Deserialize, Serialize};

/// Which write path a hook validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookType {
    ValidateFeature,
    ValidateFeatureRevision,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidateFeature => "validateFeature",
            Self::ValidateFeatureRevision => "validateFeatureRevision",
        }
    }
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation hook. Created and edited by organization admins through
/// the surrounding application; read-only to this crate, which only records
/// success/failure telemetry against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDefinition {
    pub id: String,
    pub hook_type: HookType,
    /// Project scope; empty means the hook applies to all projects.
    #[serde(default)]
    pub project: String,
    /// Statement sequence forming the hook body (not a full function).
    pub code: String,
    /// When set, a failure is forgiven if the hook already failed with the
    /// identical error against the pre-change state.
    #[serde(default)]
    pub incremental_changes_only: bool,
}
