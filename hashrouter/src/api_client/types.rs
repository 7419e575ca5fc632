//! Wire types for the API client.
//!
//! The client shares the server's response structs (they live in
//! `crate::api::v1` and derive both Serialize and Deserialize); this
//! module re-exports them under the client's namespace so external
//! consumers need only `api_client::types`.

pub use crate::api::v1::{
    ContractInfo, ContractsResponse, MinerInfo, MinersResponse, WorkerInfo, WorkersResponse,
};
