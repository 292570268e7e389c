//! Trellis hooks — organization-authored validation hooks for feature and
//! feature-revision writes.
//!
//! The runner loads an organization's hooks through a permission-elevated
//! store view, executes each one sequentially in the sandbox, forgives
//! failures that pre-date the change being validated (when the hook opts
//! into incremental-changes-only), and rejects the write on the first hook
//! failure that cannot be excused.

mod definition;
mod feature;
mod runner;
mod store;
mod validate;

pub use definition::{HookDefinition, HookType};
pub use feature::{Feature, FeatureRevision};
pub use runner::{CUSTOM_HOOKS_FEATURE, HookError};
pub use store::{ContextResolver, Entitlements, HookStore, OrgContext};
pub use validate::{run_validate_feature_hooks, run_validate_feature_revision_hooks};
