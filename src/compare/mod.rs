//! Workflow document comparison
//!
//! Pure functions over `serde_json::Value`: canonical normalization, the
//! yes/no change detector used by sync, and the structural differ used for
//! display. All of them read their field tables from `ComparisonRules`.

pub mod detect;
pub mod diff;
pub mod normalize;
pub mod rules;

pub use detect::{detect_change, should_create_version, ChangeDecision};
pub use diff::{diff, ChangeKind, DiffEntry, WorkflowDiff};
pub use normalize::{canonical_string, normalize};
pub use rules::ComparisonRules;
