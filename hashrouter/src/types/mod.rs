//! Core types shared across the proxy and the marketplace agent.

mod hash_rate;
mod pool_url;

pub use hash_rate::HashRate;
pub use pool_url::{InvalidPoolUrl, PoolUrl};
