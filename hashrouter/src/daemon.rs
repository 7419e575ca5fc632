//! Daemon lifecycle management.
//!
//! Wires the proxy listener, the allocator, the contract subsystem, and
//! the HTTP status surface together, then runs until SIGINT/SIGTERM.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::allocator::Allocator;
use crate::api::{self, ApiConfig};
use crate::config::Config;
use crate::contract::{
    BuyerConfig, ContractFactory, ContractFactoryConfig, ContractManager, ContractStore,
};
use crate::hashrate::GlobalHashrate;
use crate::proxy::{self, SchedulerConfig};
use crate::tracing::prelude::*;

/// The main daemon.
pub struct Daemon {
    config: Config,
    store: Option<Arc<dyn ContractStore>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Daemon without a marketplace store: proxy and status surface
    /// only, regardless of `marketplace.disable`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Daemon with a marketplace store wired in.
    pub fn with_store(config: Config, store: Arc<dyn ContractStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(config)
        }
    }

    /// Run the daemon until shutdown is requested.
    pub async fn run(self) -> anyhow::Result<()> {
        self.config.validate()?;
        let default_pool = self.config.default_pool()?;

        let allocator = Arc::new(Allocator::new());
        let global = Arc::new(GlobalHashrate::new());

        // Miner-facing proxy listener
        let listener = TcpListener::bind(&self.config.proxy.listen_addr).await?;
        let scheduler_config = SchedulerConfig {
            default_pool,
            vetting_shares: self.config.miner.vetting_shares,
            share_timeout: self.config.miner.share_timeout(),
            not_propagate_worker_name: self.config.miner.not_propagate_worker_name,
        };
        self.tracker.spawn({
            let allocator = Arc::clone(&allocator);
            let global = Arc::clone(&global);
            let shutdown = self.shutdown.clone();
            async move {
                if let Err(e) =
                    proxy::serve(listener, allocator, global, scheduler_config, shutdown).await
                {
                    error!("Proxy listener error: {}", e);
                }
            }
        });

        // Marketplace contracts, when enabled and a store is wired
        let contracts = if self.config.marketplace.disable {
            None
        } else {
            match &self.store {
                Some(store) => {
                    let factory_config = ContractFactoryConfig {
                        cycle_duration: self.config.hashrate.cycle_duration(),
                        buyer: BuyerConfig {
                            validation_start_timeout: self
                                .config
                                .hashrate
                                .validation_start_timeout(),
                            validation_grace_duration: self
                                .config
                                .hashrate
                                .validation_grace_duration(),
                            error_threshold: self.config.hashrate.error_threshold,
                            error_timeout: self.config.hashrate.error_timeout(),
                            share_timeout: self.config.hashrate.share_timeout(),
                        },
                    };
                    let factory = ContractFactory::new(
                        Arc::clone(store),
                        Arc::clone(&allocator),
                        Arc::clone(&global),
                        factory_config,
                    );
                    let manager = ContractManager::new(factory, Arc::clone(store));
                    self.tracker.spawn({
                        let manager = Arc::clone(&manager);
                        let shutdown = self.shutdown.clone();
                        async move {
                            if let Err(e) = manager.run(shutdown).await {
                                error!("Contract manager error: {}", e);
                            }
                        }
                    });
                    Some(manager)
                }
                None => {
                    warn!("Marketplace enabled but no contract store wired; running proxy only");
                    None
                }
            }
        };

        // Status surface
        self.tracker.spawn({
            let api_config = ApiConfig {
                bind_addr: self.config.web.listen_addr.clone(),
            };
            let allocator = Arc::clone(&allocator);
            let global = Arc::clone(&global);
            let shutdown = self.shutdown.clone();
            async move {
                if let Err(e) = api::serve(api_config, allocator, global, contracts, shutdown).await
                {
                    error!("API server error: {}", e);
                }
            }
        });
        self.tracker.close();

        info!(
            proxy = %self.config.proxy.listen_addr,
            web = %self.config.web.public_url(),
            "Started"
        );

        // Install signal handlers
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            },
        }

        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("Exiting");

        Ok(())
    }
}
