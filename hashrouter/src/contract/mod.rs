//! Hashrate marketplace contracts: watchers, role dispatch, and the
//! event-driven manager.

pub mod buyer;
pub mod factory;
pub mod seller;
pub mod store;
pub mod terms;

pub use buyer::{BuyerConfig, ContractWatcherBuyer};
pub use factory::{ContractController, ContractFactory, ContractFactoryConfig};
pub use seller::ContractWatcherSeller;
pub use store::{ContractError, ContractStore};
pub use terms::{
    CloseReason, ContractEvent, ContractRole, ContractState, EncryptedTerms, Terms,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read-only contract view for the status surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSnapshot {
    pub id: String,
    pub role: ContractRole,
    pub stage: ContractState,
    pub buyer_addr: String,
    pub seller_addr: String,
    pub target_ghs: f64,
    /// Window name → GHS
    pub actual_ghs: Vec<(String, f64)>,
    pub dest: Option<String>,
    pub started_at_unix: Option<u64>,
    pub duration_secs: u64,
    pub elapsed_secs: u64,
    pub price: f64,
    pub version: u32,
    /// Fully allocated miner ids (seller side)
    pub miners: Vec<String>,
}

struct ContractEntry {
    controller: Arc<ContractController>,
    cancel: CancellationToken,
    running: bool,
}

/// Consumes the marketplace event stream and keeps one controller per
/// known contract, starting watchers when contracts are purchased and
/// cancelling them when contracts close on chain.
pub struct ContractManager {
    factory: ContractFactory,
    store: Arc<dyn ContractStore>,
    contracts: Mutex<HashMap<String, ContractEntry>>,
}

impl ContractManager {
    pub fn new(factory: ContractFactory, store: Arc<dyn ContractStore>) -> Arc<Self> {
        Arc::new(Self {
            factory,
            store,
            contracts: Mutex::new(HashMap::new()),
        })
    }

    /// Snapshots of every known contract.
    pub fn snapshots(&self) -> Vec<ContractSnapshot> {
        let contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
        contracts.values().map(|e| e.controller.snapshot()).collect()
    }

    /// Run until cancelled or the event stream ends.
    pub async fn run(self: Arc<Self>, ct: CancellationToken) -> Result<(), ContractError> {
        let mut events = self.store.subscribe_events().await?;
        info!(wallet = %self.factory.wallet_address(), "Watching marketplace contracts");

        loop {
            let event = tokio::select! {
                _ = ct.cancelled() => break,
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => {
                        warn!("Contract event stream ended");
                        break;
                    }
                },
            };

            match event {
                ContractEvent::Created(enc) | ContractEvent::PurchaseInfoUpdated(enc) => {
                    if let Err(e) = self.upsert(&ct, enc).await {
                        warn!(error = %e, "Failed to track contract");
                    }
                }
                ContractEvent::Closed { contract_id } => self.stop_contract(&contract_id),
            }
        }

        // Shut down every running watcher
        let entries: Vec<CancellationToken> = {
            let contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
            contracts.values().map(|e| e.cancel.clone()).collect()
        };
        for cancel in entries {
            cancel.cancel();
        }
        Ok(())
    }

    /// Track a contract; start its watcher once it has been purchased.
    async fn upsert(
        self: &Arc<Self>,
        ct: &CancellationToken,
        enc: EncryptedTerms,
    ) -> Result<(), ContractError> {
        let id = enc.contract_id().to_string();
        let started = enc.terms.started_at.is_some();

        // Known contract: refresh terms, maybe start
        let needs_create = {
            let contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
            match contracts.get(&id) {
                Some(entry) => {
                    entry.controller.set_terms(enc.terms.clone());
                    false
                }
                None => true,
            }
        };

        if needs_create {
            let controller = Arc::new(self.factory.create_contract(&enc).await?);
            let mut contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
            contracts.insert(
                id.clone(),
                ContractEntry {
                    controller,
                    cancel: ct.child_token(),
                    running: false,
                },
            );
            debug!(contract = %id, "Contract tracked");
        }

        if started {
            self.start_watcher(&id);
        }
        Ok(())
    }

    fn start_watcher(self: &Arc<Self>, id: &str) {
        let mut contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = contracts.get_mut(id) else {
            return;
        };
        if entry.running || entry.controller.state() == ContractState::Closed {
            return;
        }
        entry.running = true;

        let controller = Arc::clone(&entry.controller);
        let cancel = entry.cancel.clone();
        let manager = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            let _ = controller.run(cancel).await;
            let mut contracts = manager.contracts.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = contracts.get_mut(&id) {
                entry.running = false;
            }
        });
    }

    fn stop_contract(&self, id: &str) {
        let contracts = self.contracts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = contracts.get(id) {
            info!(contract = %id, "Contract closed on chain, stopping watcher");
            entry.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::contract::store::mock::MockStore;
    use crate::hashrate::GlobalHashrate;
    use crate::types::PoolUrl;
    use std::time::{Duration, SystemTime};

    fn manager_with_store() -> (Arc<ContractManager>, Arc<MockStore>) {
        let store = Arc::new(MockStore::with_dest(
            "0xme",
            PoolUrl::parse("stratum+tcp://s@secret.pool:3333").unwrap(),
        ));
        let factory = ContractFactory::new(
            Arc::clone(&store) as Arc<dyn ContractStore>,
            Arc::new(Allocator::new()),
            Arc::new(GlobalHashrate::new()),
            ContractFactoryConfig {
                cycle_duration: Duration::from_secs(60),
                buyer: BuyerConfig {
                    validation_start_timeout: Duration::from_secs(60),
                    validation_grace_duration: Duration::from_secs(600),
                    error_threshold: 0.05,
                    error_timeout: Duration::from_secs(120),
                    share_timeout: Duration::from_secs(120),
                },
            },
        );
        let manager = ContractManager::new(factory, Arc::clone(&store) as Arc<dyn ContractStore>);
        (manager, store)
    }

    fn enc(started: bool) -> EncryptedTerms {
        EncryptedTerms {
            terms: Terms {
                contract_id: "0xc1".into(),
                seller: "0xme".into(),
                buyer: "0xother".into(),
                dest: None,
                hashrate_ghs: 50.0,
                started_at: started.then(SystemTime::now),
                duration: Duration::from_secs(3600),
                price: 1.0,
                version: 0,
            },
            encrypted_dest: "00".into(),
        }
    }

    #[tokio::test]
    async fn pending_contract_tracked_but_not_running() {
        let (manager, store) = manager_with_store();
        let ct = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&manager).run(ct.clone()));

        // Wait for subscription, then deliver an unsold contract
        let tx = loop {
            if let Some(tx) = store.event_tx.lock().unwrap().clone() {
                break tx;
            }
            tokio::task::yield_now().await;
        };
        tx.send(ContractEvent::Created(enc(false))).await.unwrap();

        loop {
            let snaps = manager.snapshots();
            if !snaps.is_empty() {
                assert_eq!(snaps[0].stage, ContractState::Pending);
                break;
            }
            tokio::task::yield_now().await;
        }

        ct.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn purchase_starts_watcher_and_close_stops_it() {
        let (manager, store) = manager_with_store();
        let ct = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&manager).run(ct.clone()));

        let tx = loop {
            if let Some(tx) = store.event_tx.lock().unwrap().clone() {
                break tx;
            }
            tokio::task::yield_now().await;
        };

        tx.send(ContractEvent::Created(enc(false))).await.unwrap();
        tx.send(ContractEvent::PurchaseInfoUpdated(enc(true)))
            .await
            .unwrap();

        // Seller watcher starts fulfilling
        loop {
            let snaps = manager.snapshots();
            if snaps.first().map(|s| s.stage) == Some(ContractState::Running) {
                break;
            }
            tokio::task::yield_now().await;
        }

        // On-chain close cancels it
        tx.send(ContractEvent::Closed {
            contract_id: "0xc1".into(),
        })
        .await
        .unwrap();

        loop {
            let snaps = manager.snapshots();
            if snaps.first().map(|s| s.stage) == Some(ContractState::Closed) {
                break;
            }
            tokio::task::yield_now().await;
        }

        ct.cancel();
        handle.await.unwrap().unwrap();
    }
}
