//! Tool input parameter structs for MCP tools.
//!
//! This module defines the input types for each MCP tool, with
//! JSON Schema derivation for MCP tool discovery.
//!
//! # Validation
//!
//! Every input implements `validate()`, which should be called before any
//! request is sent to the manager. ID lists are kept in the caller's order.
//! Inputs carrying free text also implement `sanitize()`, which trims
//! whitespace and should run before validation.

use std::collections::HashSet;

use rmcp::schemars::{self, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::error::WardenError;

/// Largest number of IDs accepted by a single batch tool call.
pub const MAX_BATCH_IDS: usize = 1000;

/// Checks an ID list: non-empty, bounded, positive, no duplicates.
fn validate_ids(field: &str, ids: &[u64]) -> Result<(), WardenError> {
    if ids.is_empty() {
        return Err(WardenError::validation(format!("{} must not be empty", field)));
    }
    if ids.len() > MAX_BATCH_IDS {
        return Err(WardenError::validation(format!(
            "{} accepts at most {} IDs (got {})",
            field,
            MAX_BATCH_IDS,
            ids.len()
        )));
    }

    let mut seen = HashSet::with_capacity(ids.len());
    for &id in ids {
        if id == 0 {
            return Err(WardenError::validation(format!(
                "{} must only contain positive IDs",
                field
            )));
        }
        if !seen.insert(id) {
            return Err(WardenError::validation(format!(
                "{} contains duplicate ID {}",
                field, id
            )));
        }
    }
    Ok(())
}

/// Input parameters for the assign_policy tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AssignPolicyInput {
    /// IDs of the computers to update, processed in this order.
    pub computer_ids: Vec<u64>,

    /// ID of the policy to assign.
    pub policy_id: u64,
}

impl AssignPolicyInput {
    /// Validates the computer list and policy ID.
    ///
    /// # Errors
    ///
    /// Returns `WardenError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), WardenError> {
        validate_ids("computer_ids", &self.computer_ids)?;
        if self.policy_id == 0 {
            return Err(WardenError::validation("policy_id must be positive"));
        }
        Ok(())
    }
}

/// Input parameters for the modify_policies tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ModifyPoliciesInput {
    /// IDs of the policies to update, processed in this order.
    pub policy_ids: Vec<u64>,

    /// Policy properties to set on every policy, as a JSON object
    /// (e.g. `{"description": "Managed by automation"}`).
    pub settings: Value,
}

impl ModifyPoliciesInput {
    /// Trims property names and top-level string values in `settings`.
    ///
    /// Nested objects and non-object settings are left as they are;
    /// `validate()` rejects the latter.
    pub fn sanitize(self) -> Self {
        let settings = match self.settings {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| {
                        let value = match value {
                            Value::String(s) => Value::String(s.trim().to_string()),
                            other => other,
                        };
                        (key.trim().to_string(), value)
                    })
                    .collect(),
            ),
            other => other,
        };
        Self {
            policy_ids: self.policy_ids,
            settings,
        }
    }

    /// Validates the policy list and the settings object.
    ///
    /// # Errors
    ///
    /// Returns `WardenError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), WardenError> {
        validate_ids("policy_ids", &self.policy_ids)?;
        match self.settings.as_object() {
            Some(map) if !map.is_empty() => Ok(()),
            Some(_) => Err(WardenError::validation(
                "settings must contain at least one property",
            )),
            None => Err(WardenError::validation("settings must be a JSON object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assign(ids: Vec<u64>, policy_id: u64) -> AssignPolicyInput {
        AssignPolicyInput {
            computer_ids: ids,
            policy_id,
        }
    }

    #[test]
    fn test_assign_policy_valid() {
        assert!(assign(vec![3, 1, 2], 7).validate().is_ok());
    }

    #[test]
    fn test_assign_policy_rejects_empty_list() {
        let err = assign(vec![], 7).validate().unwrap_err();
        assert!(err.to_string().contains("computer_ids must not be empty"));
    }

    #[test]
    fn test_assign_policy_rejects_zero_policy() {
        let err = assign(vec![1], 0).validate().unwrap_err();
        assert!(err.to_string().contains("policy_id"));
    }

    #[test]
    fn test_assign_policy_rejects_zero_id() {
        assert!(assign(vec![1, 0], 7).validate().is_err());
    }

    #[test]
    fn test_assign_policy_rejects_duplicates() {
        let err = assign(vec![4, 5, 4], 7).validate().unwrap_err();
        assert!(err.to_string().contains("duplicate ID 4"));
    }

    #[test]
    fn test_assign_policy_rejects_oversized_batch() {
        let ids = (1..=(MAX_BATCH_IDS as u64 + 1)).collect();
        let err = assign(ids, 7).validate().unwrap_err();
        assert!(err.to_string().contains("at most 1000"));
    }

    #[test]
    fn test_assign_policy_deserializes() {
        let input: AssignPolicyInput =
            serde_json::from_value(json!({"computer_ids": [10, 11], "policy_id": 2})).unwrap();
        assert_eq!(input.computer_ids, vec![10, 11]);
        assert_eq!(input.policy_id, 2);
    }

    #[test]
    fn test_modify_policies_valid() {
        let input = ModifyPoliciesInput {
            policy_ids: vec![1, 2],
            settings: json!({"description": "Managed"}),
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_modify_policies_rejects_non_object_settings() {
        let input = ModifyPoliciesInput {
            policy_ids: vec![1],
            settings: json!(["description"]),
        };
        let err = input.validate().unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_modify_policies_rejects_empty_settings() {
        let input = ModifyPoliciesInput {
            policy_ids: vec![1],
            settings: json!({}),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_modify_policies_sanitize_trims_settings() {
        let input = ModifyPoliciesInput {
            policy_ids: vec![2, 1],
            settings: json!({
                " description ": "  Managed by automation\n",
                "autoRequiresUpdate": "on ",
                "recommendationScanMode": {"mode": " off "}
            }),
        }
        .sanitize();

        assert_eq!(input.policy_ids, vec![2, 1]);
        assert_eq!(
            input.settings,
            json!({
                "description": "Managed by automation",
                "autoRequiresUpdate": "on",
                "recommendationScanMode": {"mode": " off "}
            })
        );
    }

    #[test]
    fn test_modify_policies_sanitize_keeps_non_object_settings() {
        let input = ModifyPoliciesInput {
            policy_ids: vec![1],
            settings: json!(" description "),
        }
        .sanitize();

        assert_eq!(input.settings, json!(" description "));
        assert!(input.validate().is_err());
    }
}
