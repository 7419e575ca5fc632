//! The marketplace RPC collaborator.
//!
//! Everything on-chain sits behind [`ContractStore`]: event subscription
//! filtered by the agent's wallet, decryption of the destination payload
//! with the wallet key, and signed close writes. The agent core never
//! touches keys or RPC endpoints directly.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::terms::{CloseReason, ContractEvent, EncryptedTerms, Terms};

/// Contract subsystem errors.
#[derive(Error, Debug)]
pub enum ContractError {
    /// The contract was closed (on chain or by cancellation) while the
    /// watcher was running
    #[error("contract closed")]
    Closed,

    /// Delivered hashrate stayed outside tolerance past the error
    /// timeout
    #[error("hashrate outside contracted tolerance")]
    ViolationHashrate,

    /// No shares arrived at the contract destination within the share
    /// timeout
    #[error("no shares observed at contract destination")]
    ViolationSilence,

    /// Marketplace RPC failure
    #[error("marketplace store: {0}")]
    Store(String),

    /// Terms decryption failed
    #[error("terms decryption: {0}")]
    Decrypt(String),

    /// Terms do not involve this wallet, or are malformed
    #[error("invalid terms: {0}")]
    InvalidTerms(String),
}

/// On-chain marketplace repository, as seen by the agent core.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// The wallet address derived from the configured key; decides the
    /// agent's role per contract.
    fn wallet_address(&self) -> String;

    /// Stream of contract-state events filtered by the agent's wallet.
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<ContractEvent>, ContractError>;

    /// Decrypt the destination payload with the wallet's private key.
    async fn decrypt_terms(&self, terms: &EncryptedTerms) -> Result<Terms, ContractError>;

    /// Close a contract on chain with the given reason (signed write).
    async fn close_contract(
        &self,
        contract_id: &str,
        reason: CloseReason,
    ) -> Result<(), ContractError>;
}
