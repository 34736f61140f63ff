//! Data models for the manager API.
//!
//! Only the fields Warden reads or writes are modelled. Responses may
//! carry many more fields; serde ignores them.

mod common;
mod computer;
mod policy;

pub use common::*;
pub use computer::*;
pub use policy::*;
