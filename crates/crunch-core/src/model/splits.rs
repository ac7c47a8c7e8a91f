use serde::{Deserialize, Serialize};

use super::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SplitGroup {
    Train,
    Test,
}

/// Marker on test keys kept in a shrunk test set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitReduced {
    #[serde(rename = "X")]
    X,
    #[serde(rename = "XY")]
    Xy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataReleaseSplit {
    pub key: i64,
    pub group: SplitGroup,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduced: Option<SplitReduced>,
}

impl DataReleaseSplit {
    pub fn train(key: i64) -> Self {
        Self {
            key,
            group: SplitGroup::Train,
            reduced: None,
        }
    }

    pub fn test(key: i64) -> Self {
        Self {
            key,
            group: SplitGroup::Test,
            reduced: None,
        }
    }
}

/// Which test keys drive the loop when some of them are marked reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReducedPolicy {
    /// Every test key, reduced or not.
    #[default]
    Include,
    /// Only unmarked test keys.
    Exclude,
    /// Only keys carrying this marker.
    Only(SplitReduced),
}

impl ReducedPolicy {
    fn accepts(self, reduced: Option<SplitReduced>) -> bool {
        match self {
            Self::Include => true,
            Self::Exclude => reduced.is_none(),
            Self::Only(marker) => reduced == Some(marker),
        }
    }
}

/// Sorted test keys after reduced filtering. Fails on a key listed twice.
pub fn test_keys(splits: &[DataReleaseSplit], policy: ReducedPolicy) -> Result<Vec<i64>, ModelError> {
    let mut all: Vec<i64> = splits.iter().map(|s| s.key).collect();
    all.sort_unstable();
    if let Some(pair) = all.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(ModelError::DuplicateSplitKey { key: pair[0] });
    }

    let mut keys: Vec<i64> = splits
        .iter()
        .filter(|s| s.group == SplitGroup::Test && policy.accepts(s.reduced))
        .map(|s| s.key)
        .collect();
    keys.sort_unstable();
    Ok(keys)
}
