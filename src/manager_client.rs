//! HTTP client for the manager's administrative API.
//!
//! `ManagerClient` sends authenticated JSON requests and maps HTTP failures
//! onto [`WardenError`]. It performs exactly one HTTP call per operation:
//! retrying on rate limits is the job of [`BatchUpdater`], which counts
//! every attempt.
//!
//! # Security
//!
//! The API secret is never logged. Error bodies are sanitized and truncated
//! before they are stored in an error.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchError, BatchUpdater, UpdateTarget};
use crate::config::Config;
use crate::error::WardenError;
use crate::models::{ApiKeyInfo, Computer, ComputerPatch, ErrorBody, Policy, ResourceRef};

/// Header carrying the API secret key.
const SECRET_HEADER: &str = "api-secret-key";

/// Header carrying the API version.
const VERSION_HEADER: &str = "api-version";

/// Maximum length for error bodies kept in `WardenError::HttpStatus`.
const MAX_ERROR_BODY_LEN: usize = 500;

/// Collections that support modify-by-ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `/computers`
    Computers,
    /// `/policies`
    Policies,
}

impl ResourceKind {
    /// Path segment of the collection.
    pub fn collection(self) -> &'static str {
        match self {
            ResourceKind::Computers => "computers",
            ResourceKind::Policies => "policies",
        }
    }

    /// Singular noun for log and error messages.
    pub fn noun(self) -> &'static str {
        match self {
            ResourceKind::Computers => "computer",
            ResourceKind::Policies => "policy",
        }
    }
}

/// HTTP client for the manager API.
///
/// Cloning is cheap; clones share the connection pool.
///
/// # Example
///
/// ```ignore
/// let config = Config::from_env()?;
/// let client = ManagerClient::new(&config)?;
///
/// let done = client.assign_policy(&[101, 102], 7, None).await?;
/// ```
#[derive(Clone)]
pub struct ManagerClient {
    http: Client,

    /// Base URL ending in `/api`.
    base_url: String,

    api_version: String,

    timeout: Duration,

    /// SECURITY: Never log this value!
    api_secret: String,
}

impl ManagerClient {
    /// Creates a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `WardenError::HttpClient` if the HTTP client fails to initialize.
    pub fn new(config: &Config) -> Result<Self, WardenError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(WardenError::HttpClient)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            timeout: config.timeout,
            api_secret: config.api_secret().to_string(),
        })
    }

    /// Returns the API secret for sanitization purposes only.
    pub(crate) fn api_secret_for_sanitization(&self) -> &str {
        &self.api_secret
    }

    /// Checks that the manager is reachable and accepts the API secret.
    ///
    /// # Errors
    ///
    /// Returns `WardenError::ConnectionTest` describing the failure.
    pub async fn test_connection(&self) -> Result<ApiKeyInfo, WardenError> {
        tracing::debug!("Testing connection to manager");

        match self
            .request::<ApiKeyInfo, ()>(Method::GET, "/apikeys/current", None)
            .await
        {
            Ok(key) => {
                tracing::info!(key_id = key.id, "Connection test successful");
                Ok(key)
            }
            Err(WardenError::Authentication) => Err(WardenError::connection_test(
                "Authentication failed - verify WARDEN_API_SECRET is correct",
            )),
            Err(WardenError::Timeout { duration, .. }) => Err(WardenError::connection_test(format!(
                "Connection timed out after {:?} - verify WARDEN_MANAGER_URL is correct and the manager is reachable",
                duration
            ))),
            Err(e) => Err(WardenError::connection_test(
                e.sanitized_display(&self.api_secret),
            )),
        }
    }

    /// Modifies one object and returns the manager's view of it.
    ///
    /// Sends `POST /{collection}/{id}?overrides=false` with `patch` as JSON.
    /// Makes exactly one HTTP call.
    pub async fn modify_resource<B, T>(
        &self,
        kind: ResourceKind,
        id: u64,
        patch: &B,
    ) -> Result<T, WardenError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let path = format!("/{}/{}", kind.collection(), id);
        self.request(Method::POST, &path, Some(patch))
            .await
            .map_err(|e| match e {
                WardenError::NotFound { .. } => {
                    WardenError::not_found(format!("{} {}", kind.noun(), id))
                }
                other => other,
            })
    }

    /// Modifies a single computer.
    pub async fn modify_computer(
        &self,
        id: u64,
        patch: &ComputerPatch,
    ) -> Result<Computer, WardenError> {
        self.modify_resource(ResourceKind::Computers, id, patch).await
    }

    /// Modifies a single policy with a JSON patch.
    pub async fn modify_policy(
        &self,
        id: u64,
        patch: &serde_json::Value,
    ) -> Result<Policy, WardenError> {
        self.modify_resource(ResourceKind::Policies, id, patch).await
    }

    // ========================================================================
    // Bulk operations
    // ========================================================================

    /// Assigns `policy_id` to every computer in `computer_ids`, in order.
    ///
    /// Rate-limited calls are retried with exponential backoff. On failure
    /// the error lists the computers that were already updated.
    pub async fn assign_policy(
        &self,
        computer_ids: &[u64],
        policy_id: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<u64>, BatchError<u64, WardenError>> {
        tracing::info!(
            computers = computer_ids.len(),
            policy_id,
            "Assigning policy to computers"
        );
        let patch = ComputerPatch::with_policy(policy_id);
        self.batch(ResourceKind::Computers, cancel)
            .run(computer_ids, &patch)
            .await
    }

    /// Applies the same JSON patch to every policy in `policy_ids`, in order.
    pub async fn modify_policies(
        &self,
        policy_ids: &[u64],
        settings: &serde_json::Value,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<u64>, BatchError<u64, WardenError>> {
        tracing::info!(policies = policy_ids.len(), "Modifying policies");
        self.batch(ResourceKind::Policies, cancel)
            .run(policy_ids, settings)
            .await
    }

    fn batch(
        &self,
        kind: ResourceKind,
        cancel: Option<CancellationToken>,
    ) -> BatchUpdater<ResourceUpdater> {
        let updater = BatchUpdater::new(ResourceUpdater::new(self.clone(), kind));
        match cancel {
            Some(token) => updater.with_cancellation(token),
            None => updater,
        }
    }

    // ========================================================================
    // Request plumbing
    // ========================================================================

    /// Sends one authenticated request and parses the JSON response.
    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, WardenError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);

        tracing::debug!(method = %method, path = %path, "Making manager API request");

        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(SECRET_HEADER, &self.api_secret)
            .header(VERSION_HEADER, &self.api_version)
            .header("Accept", "application/json");

        if method == Method::POST {
            req = req.query(&[("overrides", "false")]);
        }
        if let Some(payload) = body {
            req = req.json(payload);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                return WardenError::timeout(self.timeout, format!("{} {}", method, path));
            }
            WardenError::Http(e)
        })?;
        let status = response.status();

        if !status.is_success() {
            return Err(self.handle_http_error(status, path, response).await);
        }

        let text = response.text().await.map_err(WardenError::Http)?;
        tracing::trace!(body = %text, "Manager API response");

        serde_json::from_str(&text).map_err(WardenError::Serialization)
    }

    /// Converts a non-success response for `path` into a `WardenError`.
    async fn handle_http_error(
        &self,
        status: StatusCode,
        path: &str,
        response: reqwest::Response,
    ) -> WardenError {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        let body = WardenError::sanitize_message(&body, &self.api_secret);

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WardenError::Authentication,
            StatusCode::NOT_FOUND => WardenError::not_found(path),
            StatusCode::TOO_MANY_REQUESTS => {
                // BatchUpdater logs the backoff at warn level
                tracing::debug!(path = %path, ?retry_after, "Rate limited by manager");
                WardenError::RateLimited { retry_after }
            }
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                tracing::warn!(status = %status, "Manager temporarily unavailable");
                WardenError::ServiceUnavailable { status }
            }
            _ => match ErrorBody::message_from(&body) {
                Some(message) => WardenError::ManagerApi { status, message },
                None => WardenError::HttpStatus {
                    status,
                    body: truncate_body(body),
                },
            },
        }
    }
}

/// Truncates an error body on a character boundary.
fn truncate_body(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY_LEN {
        return body;
    }
    let mut end = MAX_ERROR_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &body[..end])
}

/// Applies a patch to one object of a given kind.
///
/// Plugs a [`ManagerClient`] into [`BatchUpdater`].
#[derive(Clone)]
pub struct ResourceUpdater {
    client: ManagerClient,
    kind: ResourceKind,
}

impl ResourceUpdater {
    /// Creates an updater for objects of `kind`.
    pub fn new(client: ManagerClient, kind: ResourceKind) -> Self {
        Self { client, kind }
    }
}

impl<P> UpdateTarget<u64, P> for ResourceUpdater
where
    P: Serialize + Sync + ?Sized,
{
    type Error = WardenError;

    async fn apply_update(&self, id: &u64, payload: &P) -> Result<(), WardenError> {
        let modified: ResourceRef = self.client.modify_resource(self.kind, *id, payload).await?;
        if modified.id != *id {
            tracing::warn!(
                requested = *id,
                returned = modified.id,
                "Manager returned a different object ID"
            );
        }
        Ok(())
    }
}
