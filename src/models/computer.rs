//! Computer models for the manager API.
//!
//! Only the fields needed to assign policies and report results are
//! modelled; unknown fields in responses are ignored.

use serde::{Deserialize, Serialize};

/// A computer protected by the manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Computer {
    /// Unique computer ID.
    #[serde(rename = "ID")]
    pub id: u64,

    /// Host name or IP the agent was activated with.
    #[serde(default)]
    pub host_name: Option<String>,

    /// Optional display name set by an administrator.
    #[serde(default)]
    pub display_name: Option<String>,

    /// ID of the policy assigned to the computer.
    #[serde(default, rename = "policyID")]
    pub policy_id: Option<u64>,
}

/// Partial computer sent when modifying a computer.
///
/// A `None` policy is omitted so the manager keeps the current one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComputerPatch {
    /// Policy to assign.
    #[serde(rename = "policyID", skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<u64>,
}

impl ComputerPatch {
    /// Patch that only assigns a policy.
    pub fn with_policy(policy_id: u64) -> Self {
        Self {
            policy_id: Some(policy_id),
        }
    }
}
