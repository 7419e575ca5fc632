//! Process-wide submit accounting keyed by destination worker.
//!
//! Every accepted share from every proxied miner is recorded here under
//! the destination it was submitted to. Buyer-side contract validation
//! reads these counters: it cannot see the seller's miners, only the
//! stream of shares arriving at the contract's destination.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use super::Counter;

struct WorkerEntry {
    counter: Counter,
}

/// Concurrent map of per-worker submit counters.
#[derive(Default)]
pub struct GlobalHashrate {
    workers: Mutex<HashMap<String, WorkerEntry>>,
}

impl GlobalHashrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted share for a worker (destination key).
    pub fn on_submit(&self, worker: &str, diff: f64) {
        self.on_submit_at(worker, Instant::now(), diff);
    }

    pub fn on_submit_at(&self, worker: &str, at: Instant, diff: f64) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers
            .entry(worker.to_string())
            .or_insert_with(|| WorkerEntry {
                counter: Counter::new(),
            })
            .counter
            .on_submit_at(at, diff);
    }

    /// GHS estimate for a worker over the named window, `None` if the
    /// worker has never submitted.
    pub fn hashrate_ghs(&self, worker: &str, window: &str) -> Option<f64> {
        self.hashrate_ghs_at(worker, Instant::now(), window)
    }

    pub fn hashrate_ghs_at(&self, worker: &str, at: Instant, window: &str) -> Option<f64> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers
            .get(worker)
            .and_then(|e| e.counter.hashrate_ghs_at(at, window))
    }

    /// Timestamp of the worker's latest accepted share.
    pub fn last_share_at(&self, worker: &str) -> Option<Instant> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.get(worker).and_then(|e| e.counter.last_share_at())
    }

    /// All windowed GHS estimates for one worker; empty if the worker
    /// has never submitted.
    pub fn hashrate_avg_ghs_all(&self, worker: &str) -> Vec<(String, f64)> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers
            .get(worker)
            .map(|e| e.counter.hashrate_avg_ghs_all())
            .unwrap_or_default()
    }

    /// Total submitted difficulty for a worker.
    pub fn total_work(&self, worker: &str) -> f64 {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.get(worker).map(|e| e.counter.total_work()).unwrap_or(0.0)
    }

    /// Snapshot of all workers with their windowed GHS estimates,
    /// for the status surface.
    pub fn snapshot(&self) -> Vec<(String, Vec<(String, f64)>)> {
        let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers
            .iter()
            .map(|(name, e)| (name.clone(), e.counter.hashrate_avg_ghs_all()))
            .collect()
    }
}
