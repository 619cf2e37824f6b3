//! Processor states
//!
//! Each variant carries only the bookkeeping its own state needs. The
//! processor consumes one sample per step and returns the next variant.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Discard samples until the analog front end has settled.
    Stabilize { seen: u32 },
    /// Look for signal on each channel and measure zero offsets.
    Scan { readings: u32, start: Option<u32> },
    /// Wait for a rising zero crossing, filling the voltage history.
    ZeroSync { discarded: u32 },
    /// Count mains cycles from `start` to measure the mains period.
    FreqAccum { start: u32, cycles: u16 },
    /// Derive mains period, quadrature lookback and phase factors.
    FreqCalc { start: u32, cycles: u16 },
    /// Accumulate one statistics window.
    StatAccum { start: Option<u32>, cycles: u16 },
    /// Turn the window into calibrated quantities and reports.
    StatCalc { start: u32, cycles: u16 },
}

impl State {
    /// Power-on state.
    pub const INITIAL: Self = Self::Stabilize { seen: 0 };

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stabilize { .. } => "STAB",
            Self::Scan { .. } => "SCAN",
            Self::ZeroSync { .. } => "ZERO",
            Self::FreqAccum { .. } => "FREQ",
            Self::FreqCalc { .. } => "CALF",
            Self::StatAccum { .. } => "STAT",
            Self::StatCalc { .. } => "CALS",
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
