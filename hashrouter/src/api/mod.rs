//! HTTP status surface.
//!
//! Read-only JSON views of the miner registry and the contract set, plus
//! a health endpoint. Mutating the proxy over HTTP is intentionally not
//! offered.

pub mod server;
pub mod v1;

pub use server::{serve, ApiConfig};
