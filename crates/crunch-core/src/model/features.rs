use serde::{Deserialize, Serialize};

/// Group name used when the release does not name one.
pub const DEFAULT_FEATURE_GROUP: &str = "legacy";

/// One feature as listed by the data release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFeature {
    pub name: String,
    pub group: String,
}

/// Feature groups in release order, each a de-duplicated ordered list of
/// columns. The default group always exists, possibly empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    groups: Vec<(String, Vec<String>)>,
    default_group: String,
}

impl Features {
    pub fn new(default_group: impl Into<String>) -> Self {
        let default_group = default_group.into();
        Self {
            groups: vec![(default_group.clone(), Vec::new())],
            default_group,
        }
    }

    pub fn from_release(features: &[ReleaseFeature], default_group: impl Into<String>) -> Self {
        let mut this = Self::new(default_group);
        for feature in features {
            this.push(&feature.group, &feature.name);
        }
        this
    }

    fn push(&mut self, group: &str, column: &str) {
        let index = match self.groups.iter().position(|(name, _)| name == group) {
            Some(index) => index,
            None => {
                self.groups.push((group.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };

        let columns = &mut self.groups[index].1;
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }

    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups
            .iter()
            .find(|(group, _)| group == name)
            .map(|(_, columns)| columns.as_slice())
    }

    pub fn default_columns(&self) -> &[String] {
        self.group(&self.default_group).unwrap_or(&[])
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    /// Binder view: `feature_column_names` for the default group plus one
    /// `feature_column_names_<group>` entry per group.
    pub fn to_parameter_variants(&self) -> Vec<(String, Vec<String>)> {
        let mut variants = vec![(
            "feature_column_names".to_string(),
            self.default_columns().to_vec(),
        )];
        variants.extend(
            self.groups
                .iter()
                .map(|(name, columns)| (format!("feature_column_names_{name}"), columns.clone())),
        );
        variants
    }

    /// Flatten back into release order, for the state file.
    pub fn to_release(&self) -> Vec<ReleaseFeature> {
        self.groups
            .iter()
            .flat_map(|(group, columns)| {
                columns.iter().map(move |name| ReleaseFeature {
                    name: name.clone(),
                    group: group.clone(),
                })
            })
            .collect()
    }
}

impl Default for Features {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_GROUP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(name: &str, group: &str) -> ReleaseFeature {
        ReleaseFeature {
            name: name.to_string(),
            group: group.to_string(),
        }
    }

    #[test]
    fn test_groups_are_ordered_and_deduplicated() {
        let features = Features::from_release(
            &[
                feature("f1", "alpha"),
                feature("f2", "alpha"),
                feature("f1", "alpha"),
                feature("f3", "beta"),
            ],
            "alpha",
        );

        assert_eq!(features.default_columns(), ["f1", "f2"]);
        assert_eq!(features.group("beta").unwrap(), ["f3"]);
        assert_eq!(features.group_names().collect::<Vec<_>>(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_default_group_always_present() {
        let features = Features::from_release(&[feature("f1", "alpha")], "gamma");
        assert!(features.default_columns().is_empty());

        let variants = features.to_parameter_variants();
        assert_eq!(variants[0], ("feature_column_names".to_string(), vec![]));
        assert!(variants
            .iter()
            .any(|(name, columns)| name == "feature_column_names_alpha" && columns == &["f1"]));
        assert!(variants
            .iter()
            .any(|(name, _)| name == "feature_column_names_gamma"));
    }
}
