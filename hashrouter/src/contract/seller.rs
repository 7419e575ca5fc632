//! Seller-side contract fulfillment.
//!
//! The watcher drives the allocator in cycles: whole miners first, then a
//! fractional slice of one more miner to cover the remainder for the
//! current cycle. At every cycle boundary the shortfall (or excess) of
//! the finished cycle is carried into the next cycle's target, so
//! delivery converges over the contract duration even when individual
//! cycles jitter. Over-allocation is corrected by releasing the least
//! powerful full miner, the smallest available step.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::allocator::Allocator;
use crate::hashrate::{ghs_to_job_submitted, job_submitted_to_ghs, Counter};
use crate::proxy::OnSubmit;

use super::store::ContractError;
use super::terms::{ContractRole, ContractState, Terms};
use super::ContractSnapshot;

/// Fulfills one sold contract by steering allocator assignments.
pub struct ContractWatcherSeller {
    terms: Mutex<Terms>,
    state: Mutex<ContractState>,
    full_miners: Mutex<Vec<String>>,
    /// Work delivered over the whole contract
    actual: Arc<Mutex<Counter>>,
    /// Work delivered in the current cycle
    cycle_work: Arc<Mutex<f64>>,
    cycle_duration: Duration,
    allocator: Arc<Allocator>,
}

impl ContractWatcherSeller {
    pub fn new(terms: Terms, cycle_duration: Duration, allocator: Arc<Allocator>) -> Arc<Self> {
        Arc::new(Self {
            terms: Mutex::new(terms),
            state: Mutex::new(ContractState::Pending),
            full_miners: Mutex::new(Vec::new()),
            actual: Arc::new(Mutex::new(Counter::new())),
            cycle_work: Arc::new(Mutex::new(0.0)),
            cycle_duration,
            allocator,
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

    pub fn snapshot(&self) -> ContractSnapshot {
        let terms = self.terms.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let now = SystemTime::now();
        ContractSnapshot {
            id: terms.contract_id.clone(),
            role: ContractRole::Seller,
            stage: self.state(),
            buyer_addr: terms.buyer.clone(),
            seller_addr: terms.seller.clone(),
            target_ghs: terms.hashrate_ghs,
            actual_ghs: self
                .actual
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .hashrate_avg_ghs_all(),
            dest: terms.dest.as_ref().map(|d| d.user_host()),
            started_at_unix: terms
                .started_at
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
            duration_secs: terms.duration.as_secs(),
            elapsed_secs: terms.elapsed(now).as_secs(),
            price: terms.price,
            version: terms.version,
            miners: self
                .full_miners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    /// Replace the terms, e.g. after a purchase-info update.
    pub fn set_terms(&self, terms: Terms) {
        *self.terms.lock().unwrap_or_else(|e| e.into_inner())= terms;
    }

    /// Main control loop. Returns `Ok` on a completed contract,
    /// [`ContractError::Closed`] on cancellation.
    pub async fn run(self: Arc<Self>, ct: CancellationToken) -> Result<(), ContractError> {
        let terms = self.terms.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let dest = terms
            .dest
            .clone()
            .ok_or_else(|| ContractError::InvalidTerms("seller terms missing destination".into()))?;
        let tag = terms.contract_id.clone();
        let contract_ghs = terms.hashrate_ghs;

        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ContractState::Running;
        let remaining = terms.remaining_duration(SystemTime::now());
        let contract_end = Instant::now() + remaining;
        info!(contract = %tag, target_ghs = contract_ghs,
            remaining_secs = remaining.as_secs(), "Contract fulfillment started");

        let on_submit: OnSubmit = {
            let actual = Arc::clone(&self.actual);
            let cycle_work = Arc::clone(&self.cycle_work);
            let tag = tag.clone();
            Arc::new(move |diff, miner_id| {
                actual.lock().unwrap_or_else(|e| e.into_inner()).on_submit(diff);
                *cycle_work.lock().unwrap_or_else(|e| e.into_inner()) += diff;
                trace!(contract = %tag, miner = %miner_id, diff, "Contract submit");
            })
        };

        // The running delivery target; shortfalls carry into it
        let mut target_ghs = contract_ghs;

        let result = loop {
            debug!(contract = %tag, target_ghs, "Contract cycle");

            if target_ghs > 0.0 {
                let remaining = contract_end.saturating_duration_since(Instant::now());
                let (full, remainder) = self.allocator.allocate_full_miners_for_hr(
                    &tag,
                    target_ghs,
                    &dest,
                    remaining,
                    Arc::clone(&on_submit),
                );
                if !full.is_empty() {
                    target_ghs = remainder;
                    self.full_miners
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend(full);
                }

                if target_ghs > 0.0 {
                    match self.allocator.allocate_partial_for_hr(
                        &tag,
                        target_ghs,
                        &dest,
                        self.cycle_duration,
                        Arc::clone(&on_submit),
                    ) {
                        Some(miner_id) => {
                            debug!(contract = %tag, remainder_ghs = target_ghs, miner = %miner_id,
                                "Remainder allocated partially")
                        }
                        None => {
                            warn!(contract = %tag, remainder_ghs = target_ghs,
                                "Remainder not allocated this cycle")
                        }
                    }
                }
            } else if target_ghs < 0.0 {
                // Over-delivering: release the least powerful full miner
                // and re-plan immediately
                if self.release_least_powerful(&tag, &mut target_ghs) {
                    continue;
                }
                warn!(contract = %tag, excess_ghs = -target_ghs, "Over-delivering but no full miners to release");
            }

            tokio::select! {
                _ = ct.cancelled() => break Err(ContractError::Closed),
                _ = tokio::time::sleep_until(contract_end) => {
                    let expected = ghs_to_job_submitted(contract_ghs) * terms.duration.as_secs_f64();
                    let actual = self.actual.lock().unwrap_or_else(|e| e.into_inner()).total_work();
                    let undelivered = expected - actual;
                    let undelivered_fraction = if expected > 0.0 { undelivered / expected } else { 0.0 };
                    info!(contract = %tag, undelivered_work = undelivered as i64,
                        undelivered_fraction = format!("{:.3}", undelivered_fraction),
                        "Contract ended");
                    break Ok(());
                }
                _ = tokio::time::sleep(self.cycle_duration) => {}
            }

            // Cycle boundary: carry this cycle's shortfall into the next
            let cycle_work = {
                let mut w = self.cycle_work.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *w)
            };
            let cycle_actual_ghs =
                job_submitted_to_ghs(cycle_work / self.cycle_duration.as_secs_f64());
            target_ghs = carry_over_target(target_ghs, contract_ghs, cycle_actual_ghs);
            info!(contract = %tag,
                cycle_actual_ghs = format!("{:.1}", cycle_actual_ghs),
                next_target_ghs = format!("{:.1}", target_ghs),
                "Contract cycle ended");
        };

        self.release_all(&tag, matches!(result, Err(ContractError::Closed)));
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ContractState::Closed;
        result
    }

    /// Release the least powerful currently-allocated full miner, the
    /// smallest correction step. Adds its hashrate back to the target.
    fn release_least_powerful(&self, tag: &str, target_ghs: &mut f64) -> bool {
        let mut full = self.full_miners.lock().unwrap_or_else(|e| e.into_inner());
        let weakest = full
            .iter()
            .enumerate()
            .filter_map(|(i, id)| self.allocator.miner(id).map(|m| (i, m.hashrate_ghs())))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some((idx, hr)) = weakest else {
            return false;
        };
        let miner_id = full.remove(idx);
        if let Some(miner) = self.allocator.miner(&miner_id) {
            miner.remove_tasks_by_tag(tag);
        }
        info!(miner = %miner_id, hr_ghs = hr, "Released least powerful full miner");
        *target_ghs += hr;
        true
    }

    /// Drop this contract's assignments. Full miners are released
    /// outright; a partial miner's active slice expires on its own
    /// unless the contract was cancelled.
    fn release_all(&self, tag: &str, cancelled: bool) {
        if cancelled {
            self.allocator.release_by_tag(tag);
        } else {
            for miner in self.allocator.miners() {
                if self
                    .full_miners
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains(&miner.id().to_string())
                {
                    miner.remove_tasks_by_tag(tag);
                } else {
                    miner.remove_queued_by_tag(tag);
                }
            }
        }
        self.full_miners.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Next cycle's delivery target: compensate the finished cycle's
/// shortfall (or excess, going negative) on top of the running target.
fn carry_over_target(target_ghs: f64, contract_ghs: f64, cycle_actual_ghs: f64) -> f64 {
    target_ghs + (contract_ghs - cycle_actual_ghs)
}
