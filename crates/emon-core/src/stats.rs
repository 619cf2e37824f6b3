//! Per-channel running statistics over one measurement window

/// Weight of the past in [`RunningAverage`]. Windows are about a second long,
/// so this is a ~100 s time constant.
pub const RA_PAST: f32 = 0.99;
/// Weight of the newest window in [`RunningAverage`].
pub const RA_CUR: f32 = 1.0 - RA_PAST;

/// Accumulated readings of one channel.
///
/// Integer sums are kept in 64 bits; a window of many seconds at the
/// fastest sample rate cannot overflow them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadingStats {
    /// The channel has shown signal at least once. Survives [`reset`](Self::reset).
    pub present: bool,
    pub n: u32,
    pub min: i16,
    pub max: i16,
    pub sum: i64,
    pub sum_sq: i64,
    /// Σ value × voltage-now (current channels)
    pub prod_sum: i64,
    /// Σ value × voltage-lookback
    pub prod_lookback_sum: i64,
    /// Derived RMS in physical units
    pub rms: f32,
    /// Derived active power [W] (current channels) or half peak-to-peak
    /// amplitude [V] (voltage channel)
    pub active_power: f32,
    /// Derived reactive power [VAr]
    pub reactive_power: f32,
}

impl ReadingStats {
    pub const fn new() -> Self {
        Self {
            present: false,
            n: 0,
            min: 0,
            max: 0,
            sum: 0,
            sum_sq: 0,
            prod_sum: 0,
            prod_lookback_sum: 0,
            rms: 0.0,
            active_power: 0.0,
            reactive_power: 0.0,
        }
    }

    /// Start a new window. `present` and the derived results of the last
    /// window are kept.
    pub fn reset(&mut self) {
        *self = Self {
            present: self.present,
            rms: self.rms,
            active_power: self.active_power,
            reactive_power: self.reactive_power,
            ..Self::new()
        };
    }

    fn track_extremes(&mut self, value: i16) {
        if self.n == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }

    /// Plain level statistics, used while scanning for signals.
    pub fn record_level(&mut self, value: i16) {
        self.track_extremes(value);
        self.sum += value as i64;
        self.n += 1;
    }

    /// Voltage channel: level, square and (optionally) the lookback product.
    pub fn accumulate_voltage(&mut self, value: i16, lookback: i16, with_lookback: bool) {
        self.track_extremes(value);
        let v = value as i64;
        self.sum += v;
        self.sum_sq += v * v;
        if with_lookback {
            self.prod_lookback_sum += v * lookback as i64;
        }
        self.n += 1;
    }

    /// Current channel: level, square and both voltage cross-products.
    pub fn accumulate_current(&mut self, value: i16, voltage: i16, lookback: i16) {
        self.track_extremes(value);
        let i = value as i64;
        self.sum += i;
        self.sum_sq += i * i;
        self.prod_sum += i * voltage as i64;
        self.prod_lookback_sum += i * lookback as i64;
        self.n += 1;
    }

    /// Integer mean of the window, if anything was recorded.
    pub fn mean(&self) -> Option<i16> {
        if self.n == 0 {
            return None;
        }
        Some((self.sum / self.n as i64) as i16)
    }

    /// Whether the scan saw a non-zero signal on this channel.
    pub fn shows_signal(&self) -> bool {
        self.present || (self.n > 0 && self.sum != 0)
    }
}

/// Exponential running average, seeded by the first non-zero input.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage(f32);

impl RunningAverage {
    pub const fn new() -> Self {
        Self(0.0)
    }

    pub fn update(&mut self, value: f32) -> f32 {
        if self.0 == 0.0 {
            self.0 = value;
        }
        self.0 = RA_PAST * self.0 + RA_CUR * value;
        self.0
    }
}

/// Square of the RMS, `<x²> - <x>²`, clamped to zero when noise or offset
/// drift makes it non-positive or non-finite.
pub fn variance(mean_sq: f32, mean: f32) -> f32 {
    let var = mean_sq - mean * mean;
    if var > 0.0 && var.is_finite() { var } else { 0.0 }
}

/// `√(<x²> - <x>²)` with the same clamp as [`variance`].
pub fn rms(mean_sq: f32, mean: f32) -> f32 {
    libm::sqrtf(variance(mean_sq, mean))
}
