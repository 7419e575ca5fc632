//! Stratum v1 wire protocol: typed messages and framed TCP transport.

pub mod connection;
pub mod error;
pub mod messages;

pub use connection::{Connection, ConnectionReader, ConnectionWriter, MessageRead, MessageWrite, CONNECTION_TIMEOUT};
pub use error::{StratumError, StratumResult};
pub use messages::{
    Authorize, Configure, JsonRpcMessage, Message, Notify, ResultMsg, SetDifficulty,
    SetExtranonce, SetVersionMask, Submit, Subscribe,
};
