//! Lifetime energy integration
//!
//! Power × elapsed time is accumulated in watt-seconds into a fractional
//! counter. Every time the fractional counter moves past one watt-hour
//! (3600 Ws) in either direction, one watt-hour is carried into a 32-bit
//! lifetime counter and the remainder stays behind.
//!
//! The lifetime counter steps by one and wraps like a plain `i32`. A step
//! that flips its sign while it sits beyond ±[`WRAP_GUARD`] is a wraparound,
//! and the counter restarts from zero instead of jumping to the other
//! extreme.

use log::warn;

/// Watt-seconds per watt-hour.
pub const WS_PER_WH: f32 = 3600.0;

/// Magnitude above which a sign flip of a lifetime counter is a wraparound.
pub const WRAP_GUARD: i32 = 0x7000_0000;

/// Whole watt-hours, stepped one at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifetimeCounter(i32);

impl LifetimeCounter {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i32 {
        self.0
    }

    /// Step by `+1` (`up`) or `-1`, resetting to zero on wraparound.
    pub fn step(&mut self, up: bool) {
        let old = self.0;
        let new = if up {
            old.wrapping_add(1)
        } else {
            old.wrapping_sub(1)
        };

        self.0 = if (old > WRAP_GUARD && new < 0) || (old < -WRAP_GUARD && new > 0) {
            0
        } else {
            new
        };
    }
}

/// One kind of energy: fractional watt-seconds plus whole watt-hours.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyCounter {
    fraction_ws: f32,
    whole_wh: LifetimeCounter,
}

impl EnergyCounter {
    pub fn add(&mut self, delta_ws: f32) {
        if !delta_ws.is_finite() {
            warn!("Ignoring non-finite energy delta");
            return;
        }

        self.fraction_ws += delta_ws;
        while self.fraction_ws > WS_PER_WH {
            self.fraction_ws -= WS_PER_WH;
            self.whole_wh.step(true);
        }
        while self.fraction_ws < -WS_PER_WH {
            self.fraction_ws += WS_PER_WH;
            self.whole_wh.step(false);
        }
    }

    pub fn watt_hours(&self) -> i32 {
        self.whole_wh.get()
    }

    pub fn fraction_ws(&self) -> f32 {
        self.fraction_ws
    }

    /// Everything accumulated, in watt-seconds.
    pub fn total_ws(&self) -> f64 {
        self.whole_wh.get() as f64 * WS_PER_WH as f64 + self.fraction_ws as f64
    }
}

/// Active and reactive lifetime energy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyAccumulator {
    pub active: EnergyCounter,
    pub reactive: EnergyCounter,
}

impl EnergyAccumulator {
    pub const fn new() -> Self {
        Self {
            active: EnergyCounter {
                fraction_ws: 0.0,
                whole_wh: LifetimeCounter(0),
            },
            reactive: EnergyCounter {
                fraction_ws: 0.0,
                whole_wh: LifetimeCounter(0),
            },
        }
    }

    /// Add energy deltas in watt-seconds.
    pub fn add(&mut self, active_ws: f32, reactive_ws: f32) {
        self.active.add(active_ws);
        self.reactive.add(reactive_ws);
    }

    /// Lifetime `(active, reactive)` watt-hours.
    pub fn snapshot(&self) -> (i32, i32) {
        (self.active.watt_hours(), self.reactive.watt_hours())
    }
}
