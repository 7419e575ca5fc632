//! Stratum v1 proxy and hashrate marketplace agent.
//!
//! Miners connect to the proxy and their work submissions are forwarded to
//! upstream pools on their behalf. On top of the proxy sits a marketplace
//! agent: it watches hashrate purchase contracts and, acting as seller or
//! buyer, points miner hashrate at a contract's pool for a fixed duration,
//! metering delivery and closing the contract when terms are fulfilled or
//! violated.

pub mod allocator;
pub mod api;
pub mod api_client;
pub mod config;
pub mod contract;
pub mod daemon;
pub mod hashrate;
pub mod proxy;
pub mod stratum_v1;
pub mod tracing;
pub mod types;
