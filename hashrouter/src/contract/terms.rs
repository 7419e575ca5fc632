//! Contract terms and lifecycle types.

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::types::PoolUrl;

/// Which side of a contract this agent plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractRole {
    Seller,
    Buyer,
}

impl ContractRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractRole::Seller => "seller",
            ContractRole::Buyer => "buyer",
        }
    }
}

/// Contract lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractState {
    Pending,
    Running,
    Closed,
}

impl ContractState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractState::Pending => "pending",
            ContractState::Running => "running",
            ContractState::Closed => "closed",
        }
    }
}

/// Why a contract was closed early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Terms fulfilled
    Success,
    /// Closed by the counterparty or the chain
    Cancelled,
    /// Delivered hashrate stayed outside tolerance
    ViolationHashrate,
    /// No shares observed from the seller
    ViolationSilence,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Success => "success",
            CloseReason::Cancelled => "cancelled",
            CloseReason::ViolationHashrate => "violation-hashrate",
            CloseReason::ViolationSilence => "violation-silence",
        }
    }
}

/// Decrypted (or public) contract terms.
///
/// `dest` is the buyer-chosen pool. It is carried encrypted on chain for
/// the seller; a buyer knows it in the clear because it set it at
/// purchase time.
#[derive(Debug, Clone)]
pub struct Terms {
    pub contract_id: String,
    pub seller: String,
    pub buyer: String,
    pub dest: Option<PoolUrl>,
    /// Contracted hashrate
    pub hashrate_ghs: f64,
    /// Purchase time; `None` while the contract sits unsold
    pub started_at: Option<SystemTime>,
    pub duration: Duration,
    /// Price in the marketplace token's smallest display unit
    pub price: f64,
    pub version: u32,
}

impl Terms {
    /// A contract without a purchase timestamp has not started.
    pub fn is_pending(&self) -> bool {
        self.started_at.is_none()
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.started_at.map(|t| t + self.duration)
    }

    /// Time left on the clock at `now`; zero when expired, full duration
    /// when not yet started.
    pub fn remaining_duration(&self, now: SystemTime) -> Duration {
        match self.end_time() {
            Some(end) => end.duration_since(now).unwrap_or(Duration::ZERO),
            None => self.duration,
        }
    }

    pub fn elapsed(&self, now: SystemTime) -> Duration {
        match self.started_at {
            Some(start) => now.duration_since(start).unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}

/// On-chain contract record: public terms plus the encrypted destination
/// payload only the seller's key can open.
#[derive(Debug, Clone)]
pub struct EncryptedTerms {
    pub terms: Terms,
    /// Hex-encoded ciphertext of the destination URL
    pub encrypted_dest: String,
}

impl EncryptedTerms {
    pub fn contract_id(&self) -> &str {
        &self.terms.contract_id
    }

    pub fn seller(&self) -> &str {
        &self.terms.seller
    }

    pub fn buyer(&self) -> &str {
        &self.terms.buyer
    }
}

/// Marketplace events the agent reacts to, filtered by its wallet.
#[derive(Debug, Clone)]
pub enum ContractEvent {
    /// A contract involving this wallet appeared
    Created(EncryptedTerms),
    /// Purchase info changed (typically: the contract was bought and
    /// `started_at` is now set)
    PurchaseInfoUpdated(EncryptedTerms),
    /// The contract closed on chain
    Closed { contract_id: String },
}
