//! Buyer-side contract validation.
//!
//! The buyer cannot see the seller's miners; it watches the stream of
//! accepted shares arriving at the destination it chose at purchase time
//! (via the global per-destination counters) and closes the contract
//! early when the seller under-performs or goes silent. During the
//! ramp-up window after contract start the error tolerance is loosened
//! and tightens linearly down to the configured threshold, so normal EMA
//! warm-up is not mistaken for a violation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hashrate::GlobalHashrate;

use super::store::ContractError;
use super::terms::{ContractRole, ContractState, Terms};
use super::ContractSnapshot;

/// How often delivered hashrate is re-evaluated.
const VALIDATION_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Error-threshold multiplier at the very start of the grace ramp.
const GRACE_START_FACTOR: f64 = 5.0;

/// Window used for the trailing delivered-hashrate estimate.
const VALIDATION_WINDOW: &str = "5m";

/// Buyer-side validation knobs.
#[derive(Debug, Clone)]
pub struct BuyerConfig {
    /// Delay from contract start before validation begins
    pub validation_start_timeout: Duration,
    /// Ramp window over which the threshold tightens to its final value
    pub validation_grace_duration: Duration,
    /// Final relative-error tolerance
    pub error_threshold: f64,
    /// How long the error must stay above threshold before closing
    pub error_timeout: Duration,
    /// Close after this long without any share at the destination
    pub share_timeout: Duration,
}

/// Watches a purchased contract and enforces delivery on the seller.
pub struct ContractWatcherBuyer {
    terms: Mutex<Terms>,
    state: Mutex<ContractState>,
    config: BuyerConfig,
    global: Arc<GlobalHashrate>,
}

impl ContractWatcherBuyer {
    pub fn new(terms: Terms, config: BuyerConfig, global: Arc<GlobalHashrate>) -> Arc<Self> {
        Arc::new(Self {
            terms: Mutex::new(terms),
            state: Mutex::new(ContractState::Pending),
            config,
            global,
        })
    }

    pub fn state(&self) -> ContractState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contract_id(&self) -> String {
        self.terms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contract_id
            .clone()
    }

    pub fn set_terms(&self, terms: Terms) {
        *self.terms.lock().unwrap_or_else(|e| e.into_inner()) = terms;
    }

    pub fn snapshot(&self) -> ContractSnapshot {
        let terms = self.terms.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let now = SystemTime::now();
        let actual_ghs = terms
            .dest
            .as_ref()
            .map(|d| self.global.hashrate_avg_ghs_all(&d.to_string()))
            .unwrap_or_default();
        ContractSnapshot {
            id: terms.contract_id.clone(),
            role: ContractRole::Buyer,
            stage: self.state(),
            buyer_addr: terms.buyer.clone(),
            seller_addr: terms.seller.clone(),
            target_ghs: terms.hashrate_ghs,
            actual_ghs,
            dest: terms.dest.as_ref().map(|d| d.user_host()),
            started_at_unix: terms
                .started_at
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            duration_secs: terms.duration.as_secs(),
            elapsed_secs: terms.elapsed(now).as_secs(),
            price: terms.price,
            version: terms.version,
            miners: Vec::new(),
        }
    }

    /// Main validation loop. `Ok` when the contract runs its course;
    /// violation errors when the seller fails its terms.
    pub async fn run(self: Arc<Self>, ct: CancellationToken) -> Result<(), ContractError> {
        let terms = self.terms.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let dest = terms
            .dest
            .clone()
            .ok_or_else(|| ContractError::InvalidTerms("buyer terms missing destination".into()))?;
        let dest_key = dest.to_string();
        let target_ghs = terms.hashrate_ghs;

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ContractState::Running;
        let start = Instant::now();
        let contract_end = start + terms.remaining_duration(SystemTime::now());
        info!(contract = %terms.contract_id, target_ghs, dest = %dest.user_host(),
            "Buyer validation armed");

        let result = self
            .validate(&ct, &terms.contract_id, &dest_key, target_ghs, start, contract_end)
            .await;

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ContractState::Closed;
        result
    }

    async fn validate(
        &self,
        ct: &CancellationToken,
        contract_id: &str,
        dest_key: &str,
        target_ghs: f64,
        start: Instant,
        contract_end: Instant,
    ) -> Result<(), ContractError> {
        // Give the seller time to rotate miners in before judging it
        tokio::select! {
            _ = ct.cancelled() => return Err(ContractError::Closed),
            _ = tokio::time::sleep_until(contract_end) => return Ok(()),
            _ = tokio::time::sleep_until(start + self.config.validation_start_timeout) => {}
        }

        let validation_started = Instant::now();
        let mut err_since: Option<Instant> = None;
        let mut ticker = tokio::time::interval(VALIDATION_POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = ct.cancelled() => return Err(ContractError::Closed),
                _ = tokio::time::sleep_until(contract_end) => {
                    info!(contract = %contract_id, "Contract ran its full duration");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            let now = Instant::now();

            // Silence: no shares at all within the share timeout
            let silent_for = match self.global.last_share_at(dest_key) {
                Some(last) => last.elapsed(),
                None => (now - validation_started).max(Duration::ZERO),
            };
            if silent_for >= self.config.share_timeout {
                warn!(contract = %contract_id, silent_secs = silent_for.as_secs(),
                    "No shares from seller within share timeout");
                return Err(ContractError::ViolationSilence);
            }

            // Hashrate: relative error against the trailing window, with
            // the grace-ramped threshold
            let actual_ghs = self
                .global
                .hashrate_ghs(dest_key, VALIDATION_WINDOW)
                .unwrap_or(0.0);
            let rel_error = (target_ghs - actual_ghs).abs() / target_ghs;
            let threshold = ramped_threshold(
                self.config.error_threshold,
                now - start,
                self.config.validation_grace_duration,
            );

            if rel_error > threshold {
                let since = *err_since.get_or_insert(now);
                debug!(contract = %contract_id,
                    actual_ghs = format!("{:.1}", actual_ghs),
                    rel_error = format!("{:.3}", rel_error),
                    threshold = format!("{:.3}", threshold),
                    err_secs = (now - since).as_secs(),
                    "Delivered hashrate outside tolerance");
                if now - since >= self.config.error_timeout {
                    warn!(contract = %contract_id, "Hashrate error persisted past error timeout");
                    return Err(ContractError::ViolationHashrate);
                }
            } else {
                err_since = None;
            }
        }
    }
}

/// The error tolerance during the ramp-up window: starts at
/// `GRACE_START_FACTOR ×` the configured threshold and tightens linearly
/// to `1 ×` over the grace duration.
fn ramped_threshold(base: f64, since_start: Duration, grace: Duration) -> f64 {
    if grace.is_zero() || since_start >= grace {
        return base;
    }
    let progress = since_start.as_secs_f64() / grace.as_secs_f64();
    base * (GRACE_START_FACTOR - (GRACE_START_FACTOR - 1.0) * progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashrate::ghs_to_job_submitted;
    use crate::types::PoolUrl;

    fn terms(target_ghs: f64, duration: Duration) -> Terms {
        Terms {
            contract_id: "0xbuy".into(),
            seller: "0xseller".into(),
            buyer: "0xbuyer".into(),
            dest: Some(PoolUrl::parse("stratum+tcp://acct:x@my.pool:3333").unwrap()),
            hashrate_ghs: target_ghs,
            started_at: Some(SystemTime::now()),
            duration,
            price: 5.0,
            version: 0,
        }
    }

    fn config() -> BuyerConfig {
        BuyerConfig {
            validation_start_timeout: Duration::from_secs(60),
            validation_grace_duration: Duration::from_secs(600),
            error_threshold: 0.05,
            error_timeout: Duration::from_secs(120),
            share_timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn threshold_ramp_is_linear() {
        let grace = Duration::from_secs(600);
        // 5x at start
        assert!((ramped_threshold(0.05, Duration::ZERO, grace) - 0.25).abs() < 1e-12);
        // Halfway: 3x
        assert!((ramped_threshold(0.05, Duration::from_secs(300), grace) - 0.15).abs() < 1e-12);
        // At and past the end: base
        assert_eq!(ramped_threshold(0.05, grace, grace), 0.05);
        assert_eq!(ramped_threshold(0.05, Duration::from_secs(900), grace), 0.05);
        // Degenerate grace
        assert_eq!(ramped_threshold(0.05, Duration::ZERO, Duration::ZERO), 0.05);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_violation_after_timeouts() {
        let global = Arc::new(GlobalHashrate::new());
        let watcher =
            ContractWatcherBuyer::new(terms(100.0, Duration::from_secs(7200)), config(), global);
        let ct = CancellationToken::new();

        let res = Arc::clone(&watcher).run(ct).await;
        assert!(matches!(res, Err(ContractError::ViolationSilence)));
        assert_eq!(watcher.state(), ContractState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn hashrate_violation_when_error_persists() {
        let global = Arc::new(GlobalHashrate::new());
        // Deliver ~50 GHS against a 100 GHS target: relative error 0.5,
        // above even the ramped threshold
        let dest_key = "stratum+tcp://acct:x@my.pool:3333";
        global.on_submit(dest_key, ghs_to_job_submitted(50.0) * 300.0);

        let watcher =
            ContractWatcherBuyer::new(terms(100.0, Duration::from_secs(7200)), config(), global);
        let ct = CancellationToken::new();

        let res = Arc::clone(&watcher).run(ct).await;
        assert!(matches!(res, Err(ContractError::ViolationHashrate)));
    }

    #[tokio::test(start_paused = true)]
    async fn on_target_delivery_runs_to_completion() {
        let global = Arc::new(GlobalHashrate::new());
        let dest_key = "stratum+tcp://acct:x@my.pool:3333";
        // Exactly on target: relative error ~0
        global.on_submit(dest_key, ghs_to_job_submitted(100.0) * 300.0);

        let watcher =
            ContractWatcherBuyer::new(terms(100.0, Duration::from_secs(600)), config(), global);
        let ct = CancellationToken::new();

        let res = Arc::clone(&watcher).run(ct).await;
        assert!(res.is_ok());
        assert_eq!(watcher.state(), ContractState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_surfaces_contract_closed() {
        let global = Arc::new(GlobalHashrate::new());
        let watcher =
            ContractWatcherBuyer::new(terms(100.0, Duration::from_secs(7200)), config(), global);
        let ct = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&watcher).run(ct.clone()));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        ct.cancel();
        let res = handle.await.unwrap();
        assert!(matches!(res, Err(ContractError::Closed)));
    }
}
