//! MCP server implementation for Warden.
//!
//! This module defines the `WardenServer` struct that implements the MCP
//! `ServerHandler` trait, exposing bulk manager operations as tools.

use std::future::Future;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ServerHandler,
};
use tokio_util::sync::CancellationToken;

use crate::batch::BatchError;
use crate::error::WardenError;
use crate::manager_client::{ManagerClient, ResourceKind};
use crate::tools::{AssignPolicyInput, ModifyPoliciesInput};

/// The Warden MCP server.
#[derive(Clone)]
pub struct WardenServer {
    /// Manager client for API operations.
    client: ManagerClient,
    /// Cancelled on shutdown; running batches stop at their next backoff.
    shutdown: CancellationToken,
    /// Tool router for MCP tool dispatch.
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl WardenServer {
    /// Creates a new server instance.
    pub fn new(client: ManagerClient, shutdown: CancellationToken) -> Self {
        Self {
            client,
            shutdown,
            tool_router: Self::tool_router(),
        }
    }

    /// Returns "pong" so clients can check the server is up.
    #[tool(description = "Test connectivity to the Warden MCP server. Returns 'pong' if the server is running correctly.")]
    fn ping(&self) -> String {
        tracing::debug!("ping tool called");
        "pong".to_string()
    }

    #[tool(description = "Check that the security manager is reachable and the API key is accepted. Returns the API key name.")]
    async fn test_connection(&self) -> Result<String, String> {
        tracing::debug!("test_connection tool called");

        let key = self.client.test_connection().await.map_err(|e| {
            let sanitized = self.sanitize_error(&e);
            tracing::error!(error = %sanitized, "Connection test failed");
            sanitized
        })?;

        Ok(format!(
            "Connected. API key #{} ({})",
            key.id,
            key.key_name.as_deref().unwrap_or("unnamed")
        ))
    }

    /// Assign one policy to many computers.
    ///
    /// Computers are updated one at a time in the given order. Rate-limited
    /// calls are retried with exponential backoff.
    #[tool(description = "Assign a policy to a list of computers. Computers are updated one at a time in the given order; API rate limits are retried automatically. On failure, reports which computers were already updated.")]
    async fn assign_policy(
        &self,
        Parameters(input): Parameters<AssignPolicyInput>,
    ) -> Result<String, String> {
        tracing::debug!(
            computers = input.computer_ids.len(),
            policy_id = input.policy_id,
            "assign_policy tool called"
        );

        input.validate().map_err(|e| e.to_string())?;

        let outcome = self
            .client
            .assign_policy(
                &input.computer_ids,
                input.policy_id,
                Some(self.shutdown.child_token()),
            )
            .await;

        match outcome {
            Ok(done) => Ok(format_batch_success(
                ResourceKind::Computers,
                &done,
                &format!("policy {}", input.policy_id),
            )),
            Err(e) => Err(self.batch_failure(ResourceKind::Computers, input.computer_ids.len(), &e)),
        }
    }

    /// Apply the same settings to many policies.
    #[tool(description = "Apply the same property changes (a JSON object) to a list of policies. Policies are updated one at a time in the given order; API rate limits are retried automatically. On failure, reports which policies were already updated.")]
    async fn modify_policies(
        &self,
        Parameters(input): Parameters<ModifyPoliciesInput>,
    ) -> Result<String, String> {
        tracing::debug!(policies = input.policy_ids.len(), "modify_policies tool called");

        let input = input.sanitize();
        input.validate().map_err(|e| e.to_string())?;

        let outcome = self
            .client
            .modify_policies(
                &input.policy_ids,
                &input.settings,
                Some(self.shutdown.child_token()),
            )
            .await;

        match outcome {
            Ok(done) => Ok(format_batch_success(ResourceKind::Policies, &done, "the new settings")),
            Err(e) => Err(self.batch_failure(ResourceKind::Policies, input.policy_ids.len(), &e)),
        }
    }

    /// Logs and formats a failed batch.
    fn batch_failure(
        &self,
        kind: ResourceKind,
        requested: usize,
        error: &BatchError<u64, WardenError>,
    ) -> String {
        let reason = match error {
            BatchError::Aborted { source, .. } => self.sanitize_error(source),
            BatchError::Cancelled { .. } => "server is shutting down".to_string(),
        };
        tracing::error!(
            kind = kind.collection(),
            failed_id = *error.failed_id(),
            completed = error.completed().len(),
            error = %reason,
            "Batch failed"
        );
        format_batch_failure(kind, requested, error, &reason)
    }

    /// Sanitizes an error message to remove the API secret.
    fn sanitize_error(&self, error: &WardenError) -> String {
        error.sanitized_display(self.client.api_secret_for_sanitization())
    }
}

#[tool_handler]
impl ServerHandler for WardenServer {
    /// Returns server information for the MCP initialize handshake.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Warden applies bulk changes to a security manager. \
                 Use assign_policy to set the policy of many computers and \
                 modify_policies to change properties of many policies. \
                 Start with 'ping' and 'test_connection' to verify connectivity."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Shutdown
// ============================================================================

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C signal, shutting down"),
            Err(e) => {
                tracing::warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Drives `session` until it ends, `signal` fires, or `shutdown` is cancelled.
///
/// `shutdown` is cancelled on the way out in every case, so batches still
/// running stop at their next backoff. The session's own error is returned;
/// a signal or cancellation ends serving with `Ok`.
pub async fn serve_until_shutdown<S, T, E, G>(
    session: S,
    signal: G,
    shutdown: &CancellationToken,
) -> Result<(), E>
where
    S: Future<Output = Result<T, E>>,
    G: Future<Output = ()>,
{
    let outcome = tokio::select! {
        result = session => result.map(|_| ()),
        _ = signal => Ok(()),
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested");
            Ok(())
        }
    };
    shutdown.cancel();
    outcome
}

// ============================================================================
// Response formatting helpers
// ============================================================================

/// Formats a list of IDs as `#1, #2, #3`.
fn format_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| format!("#{}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Formats a fully successful batch.
fn format_batch_success(kind: ResourceKind, done: &[u64], change: &str) -> String {
    format!(
        "Successfully applied {} to {} {}(s): {}",
        change,
        done.len(),
        kind.noun(),
        format_ids(done)
    )
}

/// Formats a batch that stopped early.
fn format_batch_failure(
    kind: ResourceKind,
    requested: usize,
    error: &BatchError<u64, WardenError>,
    reason: &str,
) -> String {
    let completed = error.completed();
    let mut output = format!(
        "Stopped at {} #{}: {}\n",
        kind.noun(),
        error.failed_id(),
        reason
    );

    if let BatchError::Aborted { attempts, .. } = error {
        if *attempts > 1 {
            output.push_str(&format!("Gave up after {} attempts.\n", attempts));
        }
    }

    output.push_str(&format!(
        "Updated {} of {} {}(s) before stopping",
        completed.len(),
        requested,
        kind.noun()
    ));
    if completed.is_empty() {
        output.push('.');
    } else {
        output.push_str(&format!(": {}", format_ids(completed)));
    }
    output.push_str("\nNo changes were rolled back.");
    output
}
