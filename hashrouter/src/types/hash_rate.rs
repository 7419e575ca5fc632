//! Display type for metered hashrate.
//!
//! Every rate in this crate is measured in GHS as `f64`, derived from
//! submitted share difficulty (see the `hashrate` module). This newtype
//! wraps that unit for log lines and the status API, picking a readable
//! magnitude when formatted. It is deliberately not used in the
//! allocation math, which stays in raw GHS.

use std::fmt;

/// A hashrate, stored in GHS.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct HashRate(f64);

impl HashRate {
    pub fn from_ghs(ghs: f64) -> Self {
        Self(ghs.max(0.0))
    }

    pub fn as_ghs(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    /// Unit prefix and scaled value for display, chosen so the number
    /// lands in [1, 1000) where possible.
    fn scaled(&self) -> (f64, &'static str) {
        if self.0 >= 1_000.0 {
            (self.0 / 1_000.0, "TH/s")
        } else if self.0 >= 1.0 {
            (self.0, "GH/s")
        } else if self.0 >= 0.001 {
            (self.0 * 1_000.0, "MH/s")
        } else {
            (self.0 * 1_000_000.0, "kH/s")
        }
    }
}

impl From<f64> for HashRate {
    fn from(ghs: f64) -> Self {
        Self::from_ghs(ghs)
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (value, unit) = self.scaled();
        write!(f, "{:.2} {}", value, unit)
    }
}
