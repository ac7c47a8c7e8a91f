use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logical roles of staged files.
pub mod role {
    pub const X_TRAIN: &str = "x_train";
    pub const Y_TRAIN: &str = "y_train";
    pub const X_TEST: &str = "x_test";
    pub const Y_TEST: &str = "y_test";
    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const Y_RAW: &str = "y_raw";
    pub const EXAMPLE_PREDICTION: &str = "example_prediction";
}

/// A remote file of the data release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    pub url: String,

    /// Size in bytes; `-1` when unknown.
    #[serde(default = "unknown_size")]
    pub size: i64,

    /// Whether the URL can be fetched without further authentication.
    #[serde(default)]
    pub signed: bool,

    /// Whether the body is gzip-compressed.
    #[serde(default)]
    pub compressed: bool,
}

fn unknown_size() -> i64 {
    -1
}

impl DataFile {
    pub fn has_known_size(&self) -> bool {
        self.size >= 0
    }
}

/// Which set of roles a release provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFilesLayout {
    /// `x_train`, `y_train`, `x_test`, optional `y_test`.
    Split,
    /// `x`, `y`, optional `y_raw`.
    Whole,
    /// Anything else, addressed by name.
    Generic,
}

/// Role → remote file. Role names are case-insensitive and stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DataFiles(BTreeMap<String, DataFile>);

impl<'de> Deserialize<'de> for DataFiles {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<DataFile>>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .filter_map(|(role, file)| file.map(|file| (role.to_ascii_lowercase(), file)))
                .collect(),
        ))
    }
}

impl DataFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: &str, file: DataFile) -> Self {
        self.0.insert(role.to_ascii_lowercase(), file);
        self
    }

    pub fn get(&self, role: &str) -> Option<&DataFile> {
        self.0.get(&role.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataFile)> {
        self.0.iter().map(|(role, file)| (role.as_str(), file))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn layout(&self) -> DataFilesLayout {
        let has = |role: &str| self.0.contains_key(role);
        if has(role::X_TRAIN) && has(role::Y_TRAIN) && has(role::X_TEST) {
            DataFilesLayout::Split
        } else if has(role::X) && has(role::Y) {
            DataFilesLayout::Whole
        } else {
            DataFilesLayout::Generic
        }
    }
}
