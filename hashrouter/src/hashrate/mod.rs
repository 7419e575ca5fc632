//! Hashrate accounting from the submit stream.
//!
//! Pools grade work in units of share difficulty: one difficulty-1 share
//! represents 2^32 expected hashes. The counter accumulates submitted
//! difficulty and maintains exponentially-decaying averages over several
//! windows, so a miner's rate can be read at 5-minute, 30-minute, and
//! 1-hour horizons plus a since-start mean.
//!
//! Timestamps are injected (`on_submit_at` / `hashrate_ghs_at`) so tests
//! run on synthetic clocks.

pub mod global;

pub use global::GlobalHashrate;

use std::time::{Duration, Instant};

/// Expected hashes represented by one difficulty-1 share (Bitcoin Stratum).
pub const HASHES_PER_DIFF_1: f64 = 4_294_967_296.0; // 2^32

/// Convert a GHS rate into submitted difficulty per second.
pub fn ghs_to_job_submitted(ghs: f64) -> f64 {
    ghs * 1e9 / HASHES_PER_DIFF_1
}

/// Convert submitted difficulty per second into GHS.
pub fn job_submitted_to_ghs(job_per_second: f64) -> f64 {
    job_per_second * HASHES_PER_DIFF_1 / 1e9
}

/// One exponentially-decaying accumulation window.
#[derive(Debug, Clone)]
struct DecayWindow {
    name: &'static str,
    tau: Duration,
    /// Decayed sum of submitted difficulty
    value: f64,
    last_update: Option<Instant>,
}

impl DecayWindow {
    fn new(name: &'static str, tau: Duration) -> Self {
        Self {
            name,
            tau,
            value: 0.0,
            last_update: None,
        }
    }

    fn decay_to(&mut self, at: Instant) {
        if let Some(last) = self.last_update {
            let dt = at.saturating_duration_since(last).as_secs_f64();
            if dt > 0.0 {
                self.value *= (-dt / self.tau.as_secs_f64()).exp();
            }
        }
        self.last_update = Some(at);
    }

    fn add(&mut self, at: Instant, diff: f64) {
        self.decay_to(at);
        self.value += diff;
    }

    /// Difficulty-per-second estimate at `at`.
    ///
    /// At equilibrium (one share of difficulty D every s seconds) the
    /// decayed sum settles at `D * tau / s`, so dividing by tau recovers
    /// the submission rate.
    fn rate_at(&self, at: Instant) -> f64 {
        let mut value = self.value;
        if let Some(last) = self.last_update {
            let dt = at.saturating_duration_since(last).as_secs_f64();
            value *= (-dt / self.tau.as_secs_f64()).exp();
        } else {
            return 0.0;
        }
        value / self.tau.as_secs_f64()
    }
}

/// Sliding-window hashrate counter over the submit stream.
#[derive(Debug, Clone)]
pub struct Counter {
    started_at: Instant,
    total_work: f64,
    last_share_at: Option<Instant>,
    windows: Vec<DecayWindow>,
}

/// Window names used by [`Counter::new`].
pub const DEFAULT_WINDOWS: [(&str, Duration); 3] = [
    ("5m", Duration::from_secs(5 * 60)),
    ("30m", Duration::from_secs(30 * 60)),
    ("1h", Duration::from_secs(60 * 60)),
];

impl Counter {
    /// Counter with the default 5m/30m/1h windows.
    pub fn new() -> Self {
        Self::with_windows(&DEFAULT_WINDOWS)
    }

    pub fn with_windows(windows: &[(&'static str, Duration)]) -> Self {
        Self {
            started_at: Instant::now(),
            total_work: 0.0,
            last_share_at: None,
            windows: windows
                .iter()
                .map(|(name, tau)| DecayWindow::new(name, *tau))
                .collect(),
        }
    }

    /// Record an accepted share of the given difficulty.
    pub fn on_submit(&mut self, diff: f64) {
        self.on_submit_at(Instant::now(), diff);
    }

    /// Record an accepted share at an explicit timestamp.
    pub fn on_submit_at(&mut self, at: Instant, diff: f64) {
        self.total_work += diff;
        self.last_share_at = Some(at);
        for w in &mut self.windows {
            w.add(at, diff);
        }
    }

    /// Total submitted difficulty since creation.
    pub fn total_work(&self) -> f64 {
        self.total_work
    }

    /// Timestamp of the most recent accepted share.
    pub fn last_share_at(&self) -> Option<Instant> {
        self.last_share_at
    }

    /// GHS estimate for one named window.
    pub fn hashrate_ghs(&self, window: &str) -> Option<f64> {
        self.hashrate_ghs_at(Instant::now(), window)
    }

    pub fn hashrate_ghs_at(&self, at: Instant, window: &str) -> Option<f64> {
        self.windows
            .iter()
            .find(|w| w.name == window)
            .map(|w| job_submitted_to_ghs(w.rate_at(at)))
    }

    /// GHS for every window plus the since-start `"mean"`.
    pub fn hashrate_avg_ghs_all(&self) -> Vec<(String, f64)> {
        self.hashrate_avg_ghs_all_at(Instant::now())
    }

    pub fn hashrate_avg_ghs_all_at(&self, at: Instant) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .windows
            .iter()
            .map(|w| (w.name.to_string(), job_submitted_to_ghs(w.rate_at(at))))
            .collect();
        out.push(("mean".to_string(), self.mean_ghs_at(at)));
        out
    }

    /// Since-start mean in GHS.
    pub fn mean_ghs_at(&self, at: Instant) -> f64 {
        let secs = at.saturating_duration_since(self.started_at).as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        job_submitted_to_ghs(self.total_work / secs)
    }

    /// Shortest-window GHS, the most responsive estimate. Used for
    /// allocation decisions.
    pub fn current_ghs(&self) -> f64 {
        self.current_ghs_at(Instant::now())
    }

    pub fn current_ghs_at(&self, at: Instant) -> f64 {
        self.windows
            .first()
            .map(|w| job_submitted_to_ghs(w.rate_at(at)))
            .unwrap_or(0.0)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}
