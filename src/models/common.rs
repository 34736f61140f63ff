//! Types shared across manager API responses.

use serde::Deserialize;

/// Error body returned by the manager on non-success responses.
///
/// The manager answers failures with `{"message": "..."}`; anything else
/// in the body is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason for the failure.
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Parses an error body, returning the trimmed message if present.
    pub fn message_from(body: &str) -> Option<String> {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
    }
}

/// Minimal view of any manager object: just its ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResourceRef {
    /// Unique object ID.
    #[serde(rename = "ID")]
    pub id: u64,
}

/// The API key the client is authenticated with.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyInfo {
    /// Unique key ID.
    #[serde(rename = "ID")]
    pub id: u64,

    /// Display name of the key.
    #[serde(default)]
    pub key_name: Option<String>,

    /// ID of the role assigned to the key.
    #[serde(default, rename = "roleID")]
    pub role_id: Option<u64>,

    /// Whether the key is currently active.
    #[serde(default)]
    pub active: Option<bool>,
}
