//! Policy models for the manager API.

use serde::Deserialize;

/// A security policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unique policy ID.
    #[serde(rename = "ID")]
    pub id: u64,

    /// Policy name.
    #[serde(default)]
    pub name: Option<String>,

    /// ID of the parent policy, if this policy inherits from one.
    #[serde(default, rename = "parentID")]
    pub parent_id: Option<u64>,

    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}
