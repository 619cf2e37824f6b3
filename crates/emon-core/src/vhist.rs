//! Short history of voltage samples
//!
//! Looking back roughly a quarter of a mains cycle gives a voltage reference
//! lagging the present one by ~90°, which is what reactive power is measured
//! against. No second physical channel is needed.

use crate::config::VHIST_SLOTS;

#[derive(Debug, Clone)]
pub struct VoltageHistory<const N: usize = VHIST_SLOTS> {
    ring: [i16; N],
    head: usize,
}

impl<const N: usize> VoltageHistory<N> {
    pub const fn new() -> Self {
        Self {
            ring: [0; N],
            // The first push lands in slot 0
            head: N - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Store the newest sample, overwriting the oldest.
    pub fn push(&mut self, value: i16) {
        self.head = (self.head + 1) % N;
        self.ring[self.head] = value;
    }

    /// Value pushed `k` samples before the most recent one.
    ///
    /// `lookback(0)` is the latest value; `k` wraps modulo the capacity.
    pub fn lookback(&self, k: usize) -> i16 {
        self.ring[(self.head + N - k % N) % N]
    }
}

impl<const N: usize> Default for VoltageHistory<N> {
    fn default() -> Self {
        Self::new()
    }
}
