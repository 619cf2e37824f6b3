use crate::config::{CHANNEL_COUNT, VOLTAGE_CHANNEL};

/// One reading of every enabled channel, taken within a single round-robin
/// sweep.
///
/// Values are ADC counts with the channel's zero offset already removed.
/// Channels removed from the scan read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    /// Monotonic microsecond counter at the end of the sweep (wraps)
    pub timestamp: u32,
    pub values: [i16; CHANNEL_COUNT],
}

impl Sample {
    pub const EMPTY: Self = Self {
        timestamp: 0,
        values: [0; CHANNEL_COUNT],
    };

    pub const fn new(timestamp: u32, values: [i16; CHANNEL_COUNT]) -> Self {
        Self { timestamp, values }
    }

    pub const fn voltage(&self) -> i16 {
        self.values[VOLTAGE_CHANNEL]
    }

    /// Value of current-transformer channel `index` (0 is the first CT,
    /// i.e. ADC channel 1).
    pub const fn current(&self, index: usize) -> i16 {
        self.values[index + 1]
    }
}
