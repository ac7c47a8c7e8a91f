//! Data-release schema types shared by every component.

mod column_names;
mod columns;
mod data_files;
mod features;
mod metrics;
mod splits;

pub use column_names::{ColumnNames, TargetColumnNames};
pub use columns::Columns;
pub use data_files::{role, DataFile, DataFiles, DataFilesLayout};
pub use features::{Features, ReleaseFeature, DEFAULT_FEATURE_GROUP};
pub use metrics::Metric;
pub use splits::{test_keys, DataReleaseSplit, ReducedPolicy, SplitGroup, SplitReduced};

/// Data-release metadata that violates a schema invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("data release declares no target")]
    NoTarget,

    #[error("duplicate target id: {id}")]
    DuplicateTargetId { id: i64 },

    #[error("duplicate split key: {key}")]
    DuplicateSplitKey { key: i64 },
}
