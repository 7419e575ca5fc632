//! Miner registry and hashrate allocation policies.
//!
//! The allocator owns the set of live miners and hands out their
//! hashrate to contract watchers. Whole miners are assigned first
//! (predictable per-cycle delivery), then a time-sliced fraction of one
//! more miner absorbs the non-integer remainder. Assignments are tagged
//! with the owning contract id so release is a filter over the queues,
//! not a back-pointer walk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::proxy::{DestItem, Miner, MinerState, OnSubmit};
use crate::types::PoolUrl;

/// Registry of live miners plus allocation policies.
#[derive(Default)]
pub struct Allocator {
    miners: Mutex<HashMap<String, Arc<Miner>>>,
}

impl Allocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a miner on connection. One entry per source connection.
    pub fn register_miner(&self, miner: Arc<Miner>) {
        let mut miners = self.miners.lock().unwrap_or_else(|e| e.into_inner());
        miners.insert(miner.id().to_string(), miner);
    }

    /// Drop a miner on disconnect.
    pub fn remove_miner(&self, id: &str) {
        let mut miners = self.miners.lock().unwrap_or_else(|e| e.into_inner());
        miners.remove(id);
    }

    /// Snapshot of all miners; entries are reference-stable by id.
    pub fn miners(&self) -> Vec<Arc<Miner>> {
        let miners = self.miners.lock().unwrap_or_else(|e| e.into_inner());
        miners.values().cloned().collect()
    }

    pub fn miner(&self, id: &str) -> Option<Arc<Miner>> {
        let miners = self.miners.lock().unwrap_or_else(|e| e.into_inner());
        miners.get(id).cloned()
    }

    /// Greedy whole-miner allocation toward a GHS target.
    ///
    /// Ready miners are considered in descending measured-hashrate order
    /// (ties: more accepted shares first, then lexicographic id) and
    /// taken while they fit under the remaining target. Each taken miner
    /// becomes `busy` with a single assignment spanning `duration`.
    /// Returns the taken miner ids and the unmet remainder.
    pub fn allocate_full_miners_for_hr(
        &self,
        tag: &str,
        target_ghs: f64,
        dest: &PoolUrl,
        duration: Duration,
        on_submit: OnSubmit,
    ) -> (Vec<String>, f64) {
        if target_ghs <= 0.0 {
            return (Vec::new(), target_ghs);
        }

        let mut candidates: Vec<Arc<Miner>> = self
            .miners()
            .into_iter()
            .filter(|m| m.state() == MinerState::Ready && m.hashrate_ghs() > 0.0)
            .collect();
        candidates.sort_by(|a, b| {
            b.hashrate_ghs()
                .partial_cmp(&a.hashrate_ghs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.accepted_shares().cmp(&a.accepted_shares()))
                .then_with(|| a.id().cmp(b.id()))
        });

        let mut remainder = target_ghs;
        let mut allocated = Vec::new();
        for miner in candidates {
            let hr = miner.hashrate_ghs();
            if hr > remainder {
                continue;
            }
            miner.set_state(MinerState::Busy);
            miner.add_dest_item(DestItem {
                dest: dest.clone(),
                fraction: 1.0,
                duration,
                tag: tag.to_string(),
                on_submit: Arc::clone(&on_submit),
            });
            remainder -= hr;
            debug!(miner = %miner.id(), hr_ghs = hr, remainder_ghs = remainder,
                contract = %tag, "Miner fully allocated");
            allocated.push(miner.id().to_string());
            if remainder <= 0.0 {
                break;
            }
        }

        if !allocated.is_empty() {
            info!(contract = %tag, count = allocated.len(), remainder_ghs = remainder,
                "Full allocation complete");
        }
        (allocated, remainder)
    }

    /// Allocate a fractional slice of one miner's next cycle.
    ///
    /// Picks the least powerful `ready` miner whose measured hashrate
    /// covers the target; its slice is `cycle * target / hashrate`, so
    /// the slice delivers the target amount averaged over the cycle.
    pub fn allocate_partial_for_hr(
        &self,
        tag: &str,
        target_ghs: f64,
        dest: &PoolUrl,
        cycle_duration: Duration,
        on_submit: OnSubmit,
    ) -> Option<String> {
        if target_ghs <= 0.0 {
            return None;
        }

        let candidate = self
            .miners()
            .into_iter()
            .filter(|m| m.state() == MinerState::Ready && m.hashrate_ghs() >= target_ghs)
            .min_by(|a, b| {
                a.hashrate_ghs()
                    .partial_cmp(&b.hashrate_ghs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;

        let fraction = (target_ghs / candidate.hashrate_ghs()).clamp(0.0, 1.0);
        let duration = cycle_duration.mul_f64(fraction);
        candidate.set_state(MinerState::PartialBusy);
        candidate.add_dest_item(DestItem {
            dest: dest.clone(),
            fraction,
            duration,
            tag: tag.to_string(),
            on_submit,
        });
        info!(miner = %candidate.id(), fraction, slice_secs = duration.as_secs(),
            contract = %tag, "Miner partially allocated");
        Some(candidate.id().to_string())
    }

    /// Remove every assignment owned by a contract. Fully drained miners
    /// return to `ready` at their next scheduling point.
    pub fn release_by_tag(&self, tag: &str) {
        for miner in self.miners() {
            if miner.has_tag(tag) {
                miner.remove_tasks_by_tag(tag);
                debug!(miner = %miner.id(), contract = %tag, "Assignments released");
            }
        }
    }

    /// Whether any miner still holds an assignment with the tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.miners().iter().any(|m| m.has_tag(tag))
    }

    /// Aggregate hashrate totals for the status surface:
    /// `(total, used, available)` in GHS. Vetting miners count toward
    /// the total but not toward available.
    pub fn hashrate_totals_ghs(&self) -> (f64, f64, f64) {
        let mut total = 0.0;
        let mut used = 0.0;
        let mut available = 0.0;
        for miner in self.miners() {
            let hr = miner.hashrate_ghs();
            total += hr;
            match miner.state() {
                MinerState::Busy => used += hr,
                MinerState::PartialBusy => {
                    let fraction = miner.assigned_fraction().min(1.0);
                    used += hr * fraction;
                    available += hr * (1.0 - fraction);
                }
                MinerState::Ready => available += hr,
                _ => {}
            }
        }
        (total, used, available)
    }
}
