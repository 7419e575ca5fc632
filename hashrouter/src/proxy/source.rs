//! Miner-side connection state.
//!
//! A `SourceConn` wraps the framed transport of one connected miner and
//! carries the Stratum state that must survive destination swaps: the
//! worker name, the last extranonce pushed to the miner, and the
//! version-rolling mask the miner negotiated. The mask travels with the
//! miner; every new destination must accept the same one.

use std::sync::Mutex;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::stratum_v1::{
    Connection, Message, MessageRead, MessageWrite, StratumError, StratumResult,
};

#[derive(Debug, Default, Clone)]
struct SourceState {
    worker_name: String,

    /// Last extranonce asserted to the miner (subscribe result or
    /// set_extranonce)
    extranonce1: String,
    extranonce2_size: usize,

    /// Mask requested by the miner in mining.configure
    requested_mask: String,
    min_bit_count: u32,

    /// Mask in effect after negotiation with the upstream pool; empty
    /// when version rolling is off
    negotiated_mask: String,
}

/// A miner connection with its Stratum session state.
pub struct SourceConn {
    id: String,
    read_half: AsyncMutex<Box<dyn MessageRead>>,
    write_half: AsyncMutex<Box<dyn MessageWrite>>,
    state: Mutex<SourceState>,
}

impl SourceConn {
    /// Wrap an accepted miner connection.
    pub fn new(conn: Connection) -> Self {
        let id = conn.id().to_string();
        let (reader, writer) = conn.split();
        Self::from_halves(id, Box::new(reader), Box::new(writer))
    }

    pub(crate) fn from_halves(
        id: String,
        reader: Box<dyn MessageRead>,
        writer: Box<dyn MessageWrite>,
    ) -> Self {
        Self {
            id,
            read_half: AsyncMutex::new(reader),
            write_half: AsyncMutex::new(writer),
            state: Mutex::new(SourceState::default()),
        }
    }

    /// Stable miner identifier (the connection id).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read one message from the miner.
    pub async fn read(&self, ct: &CancellationToken) -> StratumResult<Message> {
        let mut half = self.read_half.lock().await;
        tokio::select! {
            _ = ct.cancelled() => Err(StratumError::Cancelled),
            msg = half.read_message() => msg,
        }
    }

    /// Write one message to the miner.
    pub async fn write(&self, ct: &CancellationToken, msg: &Message) -> StratumResult<()> {
        let mut half = self.write_half.lock().await;
        tokio::select! {
            _ = ct.cancelled() => Err(StratumError::Cancelled),
            res = half.write_message(msg) => res,
        }
    }

    pub fn worker_name(&self) -> String {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).worker_name.clone()
    }

    pub fn set_worker_name(&self, name: &str) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).worker_name = name.to_string();
    }

    pub fn extranonce(&self) -> (String, usize) {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (s.extranonce1.clone(), s.extranonce2_size)
    }

    pub fn set_extranonce(&self, extranonce1: &str, extranonce2_size: usize) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.extranonce1 = extranonce1.to_string();
        s.extranonce2_size = extranonce2_size;
    }

    /// The mask and min-bit-count the miner asked for in
    /// `mining.configure`.
    pub fn requested_version_rolling(&self) -> (String, u32) {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (s.requested_mask.clone(), s.min_bit_count)
    }

    pub fn set_requested_version_rolling(&self, mask: &str, min_bit_count: u32) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.requested_mask = mask.to_string();
        s.min_bit_count = min_bit_count;
    }

    /// The mask in effect after pool negotiation; empty string when
    /// version rolling is off.
    pub fn negotiated_version_rolling_mask(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .negotiated_mask
            .clone()
    }

    pub fn set_negotiated_version_rolling_mask(&self, mask: &str) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).negotiated_mask = mask.to_string();
    }
}
