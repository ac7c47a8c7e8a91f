//! State file shared by parent and child.
//!
//! ```json
//! {
//!   "splits": [{"key": 1, "group": "TRAIN"}, {"key": 2, "group": "TEST", "reduced": "X"}],
//!   "metrics": [{"id": 1, "name": "spearman", "function": "SPEARMAN", "weight": 1.0, "score": true}],
//!   "checks": [{"function": "NANS", "scope": "ROOT", "order": 0, "parameters": {}}],
//!   "features": [{"name": "f1", "group": "legacy"}],
//!   "default_feature_group": "legacy"
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::SandboxError;
use crate::checks::Check;
use crate::model::{DataReleaseSplit, Features, Metric, ReleaseFeature};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub splits: Vec<DataReleaseSplit>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub checks: Vec<Check>,
    #[serde(default)]
    pub features: Vec<ReleaseFeature>,
    pub default_feature_group: String,
}

impl StateFile {
    pub fn feature_groups(&self) -> Features {
        Features::from_release(&self.features, self.default_feature_group.clone())
    }

    /// Written once, atomically.
    pub fn write(&self, path: &Path) -> Result<(), SandboxError> {
        let content = serde_json::to_vec_pretty(self).map_err(|e| SandboxError::State {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content).map_err(|e| SandboxError::io(&temp_path, e))?;
        std::fs::rename(&temp_path, path).map_err(|e| SandboxError::io(path, e))
    }

    pub fn read(path: &Path) -> Result<Self, SandboxError> {
        let content = std::fs::read(path).map_err(|e| SandboxError::io(path, e))?;

        serde_json::from_slice(&content).map_err(|e| SandboxError::State {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::checks::{CheckFunction, CheckScope};

    #[test]
    fn test_written_state_is_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let state = StateFile {
            splits: vec![DataReleaseSplit::train(1), DataReleaseSplit::test(2)],
            metrics: vec![serde_json::from_value(serde_json::json!({
                "id": 1,
                "name": "spearman",
                "function": "SPEARMAN",
                "score": true
            }))
            .unwrap()],
            checks: vec![Check::new(CheckFunction::Nans, CheckScope::Root, 0)],
            features: vec![ReleaseFeature {
                name: "f1".into(),
                group: "legacy".into(),
            }],
            default_feature_group: "legacy".into(),
        };
        state.write(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["splits"][1]["group"], "TEST");
        assert_eq!(json["checks"][0]["function"], "NANS");
        assert_eq!(json["default_feature_group"], "legacy");
        assert_eq!(json["metrics"][0]["function"], "SPEARMAN");

        let read = StateFile::read(&path).unwrap();
        assert_eq!(read, state);
        assert_eq!(read.feature_groups().default_columns(), ["f1"]);
        assert!(!dir.path().join("state.tmp").exists());
    }

    #[test]
    fn test_invalid_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{}").unwrap();

        assert!(matches!(
            StateFile::read(&path),
            Err(SandboxError::State { .. })
        ));
    }
}
