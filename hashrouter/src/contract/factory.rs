//! Role dispatch and the watcher-to-chain bridge.
//!
//! The factory decides which side of a contract this wallet plays and
//! builds the matching watcher: sellers get the decrypted terms (the
//! destination is encrypted on chain for them), buyers get the public
//! fields. The controller runs the watcher and converts terminal
//! violations into signed on-chain closes.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::allocator::Allocator;
use crate::hashrate::GlobalHashrate;

use super::buyer::{BuyerConfig, ContractWatcherBuyer};
use super::seller::ContractWatcherSeller;
use super::store::{ContractError, ContractStore};
use super::terms::{CloseReason, ContractRole, ContractState, EncryptedTerms, Terms};
use super::ContractSnapshot;

/// Knobs shared by all watchers built by one factory.
#[derive(Debug, Clone)]
pub struct ContractFactoryConfig {
    pub cycle_duration: Duration,
    pub buyer: BuyerConfig,
}

/// Builds watchers for incoming contract terms.
pub struct ContractFactory {
    store: Arc<dyn ContractStore>,
    allocator: Arc<Allocator>,
    global: Arc<GlobalHashrate>,
    config: ContractFactoryConfig,
    wallet_address: String,
}

impl ContractFactory {
    pub fn new(
        store: Arc<dyn ContractStore>,
        allocator: Arc<Allocator>,
        global: Arc<GlobalHashrate>,
        config: ContractFactoryConfig,
    ) -> Self {
        let wallet_address = store.wallet_address();
        Self {
            store,
            allocator,
            global,
            config,
            wallet_address,
        }
    }

    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    /// Bind terms to a watcher according to this wallet's role.
    pub async fn create_contract(
        &self,
        enc: &EncryptedTerms,
    ) -> Result<ContractController, ContractError> {
        if enc.seller() == self.wallet_address {
            let terms = self.store.decrypt_terms(enc).await?;
            let watcher = ContractWatcherSeller::new(
                terms,
                self.config.cycle_duration,
                Arc::clone(&self.allocator),
            );
            return Ok(ContractController {
                watcher: Watcher::Seller(watcher),
                store: Arc::clone(&self.store),
            });
        }
        if enc.buyer() == self.wallet_address {
            let watcher = ContractWatcherBuyer::new(
                enc.terms.clone(),
                self.config.buyer.clone(),
                Arc::clone(&self.global),
            );
            return Ok(ContractController {
                watcher: Watcher::Buyer(watcher),
                store: Arc::clone(&self.store),
            });
        }
        Err(ContractError::InvalidTerms(format!(
            "wallet {} is neither seller nor buyer of {}",
            self.wallet_address,
            enc.contract_id()
        )))
    }
}

enum Watcher {
    Seller(Arc<ContractWatcherSeller>),
    Buyer(Arc<ContractWatcherBuyer>),
}

/// Owns one watcher task and publishes its terminal state to the chain.
pub struct ContractController {
    watcher: Watcher,
    store: Arc<dyn ContractStore>,
}

impl std::fmt::Debug for ContractController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractController")
            .field("contract_id", &self.contract_id())
            .finish()
    }
}

impl ContractController {
    pub fn contract_id(&self) -> String {
        match &self.watcher {
            Watcher::Seller(w) => w.contract_id(),
            Watcher::Buyer(w) => w.contract_id(),
        }
    }

    pub fn role(&self) -> ContractRole {
        match &self.watcher {
            Watcher::Seller(_) => ContractRole::Seller,
            Watcher::Buyer(_) => ContractRole::Buyer,
        }
    }

    pub fn state(&self) -> ContractState {
        match &self.watcher {
            Watcher::Seller(w) => w.state(),
            Watcher::Buyer(w) => w.state(),
        }
    }

    pub fn snapshot(&self) -> ContractSnapshot {
        match &self.watcher {
            Watcher::Seller(w) => w.snapshot(),
            Watcher::Buyer(w) => w.snapshot(),
        }
    }

    pub fn set_terms(&self, terms: Terms) {
        match &self.watcher {
            Watcher::Seller(w) => w.set_terms(terms),
            Watcher::Buyer(w) => w.set_terms(terms),
        }
    }

    /// Run the watcher to completion and convert terminal violations
    /// into an on-chain close. Returns the watcher's result.
    pub async fn run(&self, ct: CancellationToken) -> Result<(), ContractError> {
        let id = self.contract_id();
        let result = match &self.watcher {
            Watcher::Seller(w) => Arc::clone(w).run(ct).await,
            Watcher::Buyer(w) => Arc::clone(w).run(ct).await,
        };

        match &result {
            Ok(()) => info!(contract = %id, role = %self.role().as_str(), "Contract completed"),
            Err(ContractError::Closed) => {
                info!(contract = %id, "Contract closed externally")
            }
            Err(ContractError::ViolationHashrate) => {
                self.close_early(&id, CloseReason::ViolationHashrate).await
            }
            Err(ContractError::ViolationSilence) => {
                self.close_early(&id, CloseReason::ViolationSilence).await
            }
            Err(e) => warn!(contract = %id, error = %e, "Contract watcher failed"),
        }
        result
    }

    async fn close_early(&self, id: &str, reason: CloseReason) {
        warn!(contract = %id, reason = reason.as_str(), "Closing contract early");
        if let Err(e) = self.store.close_contract(id, reason).await {
            warn!(contract = %id, error = %e, "On-chain close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::store::mock::MockStore;
    use crate::types::PoolUrl;
    use std::time::SystemTime;

    fn enc_terms(seller: &str, buyer: &str) -> EncryptedTerms {
        EncryptedTerms {
            terms: Terms {
                contract_id: "0xc1".into(),
                seller: seller.into(),
                buyer: buyer.into(),
                dest: Some(PoolUrl::parse("stratum+tcp://b@buyer.pool:3333").unwrap()),
                hashrate_ghs: 100.0,
                started_at: Some(SystemTime::now()),
                duration: Duration::from_secs(7200),
                price: 3.0,
                version: 0,
            },
            encrypted_dest: "deadbeef".into(),
        }
    }

    fn factory(store: Arc<MockStore>) -> ContractFactory {
        ContractFactory::new(
            store,
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
        )
    }

    #[tokio::test]
    async fn seller_role_gets_decrypted_terms() {
        let store = Arc::new(MockStore::with_dest(
            "0xme",
            PoolUrl::parse("stratum+tcp://s@secret.pool:3333").unwrap(),
        ));
        let factory = factory(Arc::clone(&store));

        let controller = factory
            .create_contract(&enc_terms("0xme", "0xother"))
            .await
            .unwrap();
        assert_eq!(controller.role(), ContractRole::Seller);
        assert_eq!(
            controller.snapshot().dest.as_deref(),
            Some("s@secret.pool:3333")
        );
    }

    #[tokio::test]
    async fn buyer_role_uses_public_terms() {
        let store = Arc::new(MockStore::new("0xme"));
        let factory = factory(Arc::clone(&store));

        let controller = factory
            .create_contract(&enc_terms("0xother", "0xme"))
            .await
            .unwrap();
        assert_eq!(controller.role(), ContractRole::Buyer);
        assert_eq!(
            controller.snapshot().dest.as_deref(),
            Some("b@buyer.pool:3333")
        );
    }

    #[tokio::test]
    async fn foreign_contract_is_rejected() {
        let store = Arc::new(MockStore::new("0xme"));
        let factory = factory(store);
        let err = factory
            .create_contract(&enc_terms("0xa", "0xb"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContractError::InvalidTerms(_)));
    }

    /// Buyer silence violation reaches the chain exactly once.
    #[tokio::test(start_paused = true)]
    async fn silence_violation_closes_early_once() {
        let store = Arc::new(MockStore::new("0xme"));
        let factory = factory(Arc::clone(&store));
        let controller = factory
            .create_contract(&enc_terms("0xother", "0xme"))
            .await
            .unwrap();

        let ct = CancellationToken::new();
        let res = controller.run(ct).await;
        assert!(matches!(res, Err(ContractError::ViolationSilence)));
        assert_eq!(
            store.closes(),
            vec![("0xc1".to_string(), CloseReason::ViolationSilence)]
        );
    }

    /// Buyer hashrate violation reaches the chain exactly once.
    #[tokio::test(start_paused = true)]
    async fn hashrate_violation_closes_early_once() {
        let store = Arc::new(MockStore::new("0xme"));
        let global = Arc::new(GlobalHashrate::new());
        // Sustained 40% delivery on the buyer's destination
        global.on_submit(
            "stratum+tcp://b@buyer.pool:3333",
            crate::hashrate::ghs_to_job_submitted(40.0) * 300.0,
        );

        let factory = ContractFactory::new(
            Arc::clone(&store) as Arc<dyn ContractStore>,
            Arc::new(Allocator::new()),
            global,
            ContractFactoryConfig {
                cycle_duration: Duration::from_secs(60),
                buyer: BuyerConfig {
                    validation_start_timeout: Duration::from_secs(60),
                    validation_grace_duration: Duration::from_secs(600),
                    error_threshold: 0.05,
                    error_timeout: Duration::from_secs(120),
                    share_timeout: Duration::from_secs(7200),
                },
            },
        );
        let controller = factory
            .create_contract(&enc_terms("0xother", "0xme"))
            .await
            .unwrap();

        let res = controller.run(CancellationToken::new()).await;
        assert!(matches!(res, Err(ContractError::ViolationHashrate)));
        assert_eq!(
            store.closes(),
            vec![("0xc1".to_string(), CloseReason::ViolationHashrate)]
        );
    }

    /// External cancellation never writes to the chain.
    #[tokio::test(start_paused = true)]
    async fn cancellation_does_not_close_on_chain() {
        let store = Arc::new(MockStore::new("0xme"));
        let factory = factory(Arc::clone(&store));
        let controller = Arc::new(
            factory
                .create_contract(&enc_terms("0xother", "0xme"))
                .await
                .unwrap(),
        );

        let ct = CancellationToken::new();
        let handle = tokio::spawn({
            let controller = Arc::clone(&controller);
            let ct = ct.clone();
            async move { controller.run(ct).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        ct.cancel();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(ContractError::Closed)));
        assert!(store.closes().is_empty());
    }
}
