use serde::{Deserialize, Serialize};

use super::{Columns, ModelError};

/// Column naming of one prediction target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetColumnNames {
    /// Stable id assigned by the platform.
    pub id: i64,

    /// Short display name, also the key in [`Columns`] containers.
    pub name: String,

    #[serde(default)]
    pub side: Option<String>,

    /// Ground-truth column.
    pub input: String,

    /// Prediction column.
    pub output: String,
}

impl TargetColumnNames {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            side: None,
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Immutable schema of a data release. The first target is the primary one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ColumnNamesRecord")]
pub struct ColumnNames {
    id: String,
    moon: String,
    side: Option<String>,
    targets: Vec<TargetColumnNames>,
}

#[derive(Deserialize)]
struct ColumnNamesRecord {
    id: String,
    moon: String,
    #[serde(default)]
    side: Option<String>,
    targets: Vec<TargetColumnNames>,
}

impl TryFrom<ColumnNamesRecord> for ColumnNames {
    type Error = ModelError;

    fn try_from(record: ColumnNamesRecord) -> Result<Self, Self::Error> {
        Self::new(record.id, record.moon, record.side, record.targets)
    }
}

impl ColumnNames {
    pub fn new(
        id: impl Into<String>,
        moon: impl Into<String>,
        side: Option<String>,
        targets: Vec<TargetColumnNames>,
    ) -> Result<Self, ModelError> {
        if targets.is_empty() {
            return Err(ModelError::NoTarget);
        }
        for (index, target) in targets.iter().enumerate() {
            if targets[..index].iter().any(|t| t.id == target.id) {
                return Err(ModelError::DuplicateTargetId { id: target.id });
            }
        }

        Ok(Self {
            id: id.into(),
            moon: moon.into(),
            side,
            targets,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn moon(&self) -> &str {
        &self.moon
    }

    pub fn side(&self) -> Option<&str> {
        self.side.as_deref()
    }

    pub fn targets(&self) -> &[TargetColumnNames] {
        &self.targets
    }

    pub fn primary_target(&self) -> &TargetColumnNames {
        // Non-empty by construction.
        &self.targets[0]
    }

    pub fn target(&self, name: &str) -> Option<&TargetColumnNames> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Target name → ground-truth column.
    pub fn inputs(&self) -> Columns {
        Columns::from_pairs(
            self.targets
                .iter()
                .map(|t| (t.name.clone(), t.input.clone())),
        )
    }

    /// Target name → prediction column.
    pub fn outputs(&self) -> Columns {
        Columns::from_pairs(
            self.targets
                .iter()
                .map(|t| (t.name.clone(), t.output.clone())),
        )
    }
}
