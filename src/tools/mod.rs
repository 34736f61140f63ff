//! MCP tool inputs for Warden.
//!
//! This module contains the input types for the MCP tools that expose
//! bulk manager operations.

mod inputs;

pub use inputs::*;
