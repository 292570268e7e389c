//! Validation entry points called from the feature / feature-revision write
//! paths. They assemble hook arguments from domain state and delegate to
//! the runner; a `HookError` propagating out means the write is rejected.

use crate::definition::HookType;
use crate::feature::{Feature, FeatureRevision};
use crate::runner::{HookError, run_custom_hooks};
use crate::store::OrgContext;

/// Validate a feature create or update. `original` is the pre-change state
/// and is absent for creates, which also disables the retry-against-prior-
/// state policy for this run.
pub async fn run_validate_feature_hooks(
    ctx: &OrgContext,
    feature: &Feature,
    original: Option<&Feature>,
) -> Result<(), HookError> {
    let args = vec![("feature".to_string(), serde_json::to_value(feature)?)];
    let original_args = match original {
        Some(original) => Some(vec![(
            "feature".to_string(),
            serde_json::to_value(original)?,
        )]),
        None => None,
    };

    run_custom_hooks(
        ctx,
        HookType::ValidateFeature,
        &feature.project,
        &args,
        original_args.as_deref(),
    )
    .await
}

/// Validate a feature revision. Revisions are always treated as updates
/// relative to their prior version, so the prior-state arguments are always
/// supplied — deliberately unlike feature validation, which omits them for
/// creates.
pub async fn run_validate_feature_revision_hooks(
    ctx: &OrgContext,
    feature: &Feature,
    revision: &FeatureRevision,
    original: &FeatureRevision,
) -> Result<(), HookError> {
    let args = vec![
        ("feature".to_string(), serde_json::to_value(feature)?),
        ("revision".to_string(), serde_json::to_value(revision)?),
    ];
    let original_args = vec![
        ("feature".to_string(), serde_json::to_value(feature)?),
        ("revision".to_string(), serde_json::to_value(original)?),
    ];

    run_custom_hooks(
        ctx,
        HookType::ValidateFeatureRevision,
        &feature.project,
        &args,
        Some(&original_args),
    )
    .await
}
