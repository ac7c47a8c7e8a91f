use std::ops::Index;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Read-only, insertion-ordered mapping from a target's short name to a
/// column name.
///
/// The container has no mutating API; every write path fails to compile:
///
/// ```compile_fail
/// # use crunch_core::model::Columns;
/// let mut columns = Columns::from_pairs([("w".to_string(), "target_w".to_string())]);
/// columns["w"].make_ascii_uppercase();
/// ```
///
/// ```compile_fail
/// # use crunch_core::model::Columns;
/// let mut columns = Columns::from_pairs([("w".to_string(), "target_w".to_string())]);
/// columns.w = "other".to_string();
/// ```
///
/// ```compile_fail
/// # use crunch_core::model::Columns;
/// let mut columns = Columns::from_pairs([("w".to_string(), "target_w".to_string())]);
/// columns.remove("w");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    entries: Vec<(String, String)>,
}

impl Columns {
    /// Build from `(name, column)` pairs. A repeated name keeps its first
    /// position and value.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (name, column) in pairs {
            if !entries.iter().any(|(existing, _)| *existing == name) {
                entries.push((name, column));
            }
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Column names in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Index<&str> for Columns {
    type Output = str;

    /// Panics when `name` is unknown, like map indexing.
    fn index(&self, name: &str) -> &str {
        self.get(name)
            .unwrap_or_else(|| panic!("no column for target {name:?}"))
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a str;
    type IntoIter = Box<dyn Iterator<Item = &'a str> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.values())
    }
}

impl Serialize for Columns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
