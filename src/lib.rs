//! # Warden
//!
//! Warden is an MCP (Model Context Protocol) server that applies bulk
//! configuration changes to a security manager through its administrative
//! REST API.
//!
//! ## Features
//!
//! - **Bulk updates**: assign a policy to many computers, or apply the same
//!   settings to many policies
//! - **Rate limits**: rate-limited calls are retried per item with
//!   exponential backoff (16ms, 32ms, ... up to 10 retries)
//! - **Partial progress**: when a batch stops, the IDs already updated are
//!   reported in order
//! - **Security**: the API secret is never logged or exposed in error messages
//!
//! ## Architecture
//!
//! - [`batch`] - Sequential batch updater and backoff schedule
//! - [`config`] - Explicit connection configuration, loadable from the environment
//! - [`error`] - Error types and rate-limit classification
//! - [`manager_client`] - HTTP client for the manager API
//! - [`models`] - Data models for manager requests and responses
//! - [`server`] - MCP server implementation with tool routing
//! - [`tools`] - Tool input parameter structs
//!
//! ## Configuration
//!
//! - `WARDEN_MANAGER_URL`: Base URL of the manager
//! - `WARDEN_API_SECRET`: API secret key
//! - `WARDEN_API_VERSION`: API version header (default `v1`)
//! - `WARDEN_TIMEOUT_SECS`: Request timeout (default 30)
//! - `RUST_LOG`: Log level (e.g., `warden=debug`)
//!
//! ## Example
//!
//! ```ignore
//! use warden::config::Config;
//! use warden::manager_client::ManagerClient;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = ManagerClient::new(&config)?;
//!
//!     match client.assign_policy(&[101, 102, 103], 7, None).await {
//!         Ok(done) => println!("updated {:?}", done),
//!         Err(e) => println!("updated {:?} before: {}", e.completed(), e),
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod batch;
pub mod config;
pub mod error;
pub mod manager_client;
pub mod models;
pub mod server;
pub mod tools;
