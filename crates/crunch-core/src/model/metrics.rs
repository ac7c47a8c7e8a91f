use serde::{Deserialize, Serialize};

/// A scoring metric of the competition.
///
/// Scoring happens elsewhere; the runner only carries metrics into the state
/// file, so fields it does not know are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub id: i64,
    pub name: String,
    /// Scoring function, e.g. `SPEARMAN`.
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Whether the metric contributes to the leaderboard score.
    #[serde(default)]
    pub score: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_weight() -> f64 {
    1.0
}
