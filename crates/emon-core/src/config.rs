//! Build-time dimensions, ADC timing and per-deployment calibration
//!
//! The channel count and buffer sizes are fixed at build time; everything a
//! deployment may want to tune (report cadence, window lengths, calibration
//! constants) lives in [`ProcessorConfig`] and [`Calibration`] and is handed
//! to the processor once at start-up.

use crate::error::EmonError;

/// Number of sampled ADC inputs: the voltage channel plus the current
/// transformers.
pub const CHANNEL_COUNT: usize = 5;

/// Number of current-transformer channels (every channel but the voltage one).
pub const CURRENT_CHANNELS: usize = CHANNEL_COUNT - 1;

/// The mandatory voltage channel. Always first in the scan.
pub const VOLTAGE_CHANNEL: usize = 0;

/// Slots in the sample ring buffer.
///
/// One slot is always being assembled by the interrupt handler, so at most
/// [`QUEUE_CAPACITY`] samples are waiting for the consumer.
///   Max usage at divisor 128 ~  8
///   Max usage at divisor  64 ~ 12
pub const QUEUE_SLOTS: usize = 16;

/// Samples that can be waiting for the consumer before the oldest is dropped.
pub const QUEUE_CAPACITY: usize = QUEUE_SLOTS - 1;

/// Entries in the voltage history ring.
///
/// A quarter mains cycle must fit: at divisor 64 that is 18 samples at 60 Hz
/// and 21 samples at 50 Hz.
pub const VHIST_SLOTS: usize = 24;

/// Microseconds per second, for the period constants below.
pub const SECS: u32 = 1_000_000;

/// ADC reference clock the divisor applies to.
pub const ADC_REFERENCE_CLOCK_HZ: u32 = 16_000_000;

/// ADC clock cycles needed for one conversion.
pub const ADC_CYCLES_PER_CONVERSION: u32 = 13;

/// ADC clock prescaler.
///
/// The ADC clock is `ADC_REFERENCE_CLOCK_HZ / divisor` and each conversion
/// takes 13 ADC clocks, so:
///
/// | divisor | ADC clock | conversions/s | samples per 60 Hz cycle |
/// |---------|-----------|---------------|-------------------------|
/// | 128     | 125 kHz   | 9615          | 32                      |
/// | 64      | 250 kHz   | 19231         | 64                      |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivisor(u16);

impl ClockDivisor {
    /// Divisor used by the reference deployment.
    pub const DEFAULT: Self = Self(64);

    /// Validate a prescaler value. Only powers of two from 2 to 128 exist.
    pub fn new(divisor: u16) -> Result<Self, EmonError> {
        if (2..=128).contains(&divisor) && divisor.is_power_of_two() {
            Ok(Self(divisor))
        } else {
            Err(EmonError::UnsupportedDivisor(divisor))
        }
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// Individual channel conversions per second.
    pub const fn conversions_per_sec(self) -> u32 {
        ADC_REFERENCE_CLOCK_HZ / self.0 as u32 / ADC_CYCLES_PER_CONVERSION
    }

    /// Time between two conversion-complete interrupts, in nanoseconds.
    pub const fn conversion_period_ns(self) -> u32 {
        // 1e9 * divisor * 13 / 16e6 = divisor * 13000 / 16
        self.0 as u32 * ADC_CYCLES_PER_CONVERSION * 1000 / (ADC_REFERENCE_CLOCK_HZ / 1_000_000)
    }

    /// Complete round-robin sweeps (one [`Sample`](crate::sample::Sample)
    /// each) per second with every channel enabled.
    pub const fn sweeps_per_sec(self) -> u32 {
        self.conversions_per_sec() / CHANNEL_COUNT as u32
    }

    /// Number of samples that span `duration_us` at this rate.
    pub const fn samples_for(self, duration_us: u32) -> u32 {
        (self.sweeps_per_sec() as u64 * duration_us as u64 / SECS as u64) as u32
    }
}

impl Default for ClockDivisor {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Nominal mains voltage, normally read from a DIP switch at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainsVoltage {
    V120,
    V240,
}

impl MainsVoltage {
    pub const fn volts(self) -> i32 {
        match self {
            Self::V120 => 120,
            Self::V240 => 240,
        }
    }
}

/// Scale and phase constants turning ADC counts into volts and amperes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub mains: MainsVoltage,
    /// [V/count]
    pub voltage_scale: f32,
    /// [A/count] per current channel
    pub current_scale: [f32; CURRENT_CHANNELS],
    /// Phase offset of the voltage transformer [deg]
    pub voltage_phase_deg: f32,
    /// Phase offset of each current transformer w.r.t. its own sample [deg]
    pub current_phase_deg: [f32; CURRENT_CHANNELS],
}

impl Calibration {
    /// Constants of the emonTx v3 analog front end.
    ///
    /// 13:1 resistor divider on a 3.3 V reference, an ~11 V AC adapter,
    /// SCT-013-000 current transformers (2000 turns) with 22 Ω burdens on
    /// the first three inputs and 120 Ω on the fourth.
    pub fn emontx3(mains: MainsVoltage, adc_bits: u8) -> Self {
        let full_scale = (1u32 << adc_bits) as f32;
        let adc_volts = 13.0 * 3.3 / full_scale;
        let transformer = match mains {
            MainsVoltage::V120 => 121.8 / 11.140,
            MainsVoltage::V240 => 230.0 / 11.116,
        };
        let ct = 2000.0 * 3.3 / full_scale;

        Self {
            mains,
            voltage_scale: transformer * adc_volts,
            current_scale: [ct / 22.0, ct / 22.0, ct / 22.0, ct / 120.0],
            voltage_phase_deg: 0.0,
            current_phase_deg: [0.0; CURRENT_CHANNELS],
        }
    }
}

/// When each group of quantities is pushed to the report sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportPolicy {
    /// [us] voltage report period
    pub voltage_period_us: u32,
    /// [us] power/current report period
    pub power_period_us: u32,
    /// [us] energy report period
    pub energy_period_us: u32,
    /// [us] minimum spacing of pulse count reports
    pub pulse_period_us: u32,
    /// [A] report power/current early when total current moves this much
    pub current_delta_amps: f32,
    /// [W] apparent power needed before a power factor is computed
    pub min_power_watts: f32,
    /// [V] RMS voltage needed before a crest factor is computed
    pub min_crest_vrms: f32,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            voltage_period_us: 10 * SECS,
            power_period_us: 30 * SECS,
            energy_period_us: 60 * SECS,
            pulse_period_us: SECS,
            current_delta_amps: 1.1,
            min_power_watts: 30.0,
            min_crest_vrms: 100.0,
        }
    }
}

impl ReportPolicy {
    /// Everything every second, for bench calibration.
    pub fn debug() -> Self {
        Self {
            voltage_period_us: SECS,
            power_period_us: SECS,
            energy_period_us: SECS,
            pulse_period_us: SECS,
            ..Self::default()
        }
    }
}

/// Durations and sample counts driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessorConfig {
    /// [us] time to wait for mains voltages to stabilize
    pub stabilize_duration_us: u32,
    /// Samples examined while looking for present signals
    pub scan_samples: u32,
    /// Samples always discarded before the first zero crossing is accepted
    pub zero_sync_discard: u32,
    /// Mains cycles counted to measure the mains period
    pub freq_cycles: u16,
    /// [us] minimum length of one statistics window
    pub stat_window_us: u32,
    /// Current channels considered during the signal scan
    pub noticed_channels: [bool; CURRENT_CHANNELS],
    pub report: ReportPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            stabilize_duration_us: 10 * SECS,
            scan_samples: 4000,
            zero_sync_discard: QUEUE_SLOTS as u32,
            freq_cycles: 120,
            stat_window_us: SECS,
            noticed_channels: [true; CURRENT_CHANNELS],
            report: ReportPolicy::default(),
        }
    }
}

impl ProcessorConfig {
    /// Default timing with the debug report cadence.
    pub fn debug() -> Self {
        Self {
            report: ReportPolicy::debug(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EmonError> {
        if self.scan_samples == 0 {
            return Err(EmonError::InvalidConfig("scan_samples must be non-zero"));
        }
        if self.freq_cycles == 0 {
            return Err(EmonError::InvalidConfig("freq_cycles must be non-zero"));
        }
        if self.stat_window_us == 0 {
            return Err(EmonError::InvalidConfig("stat_window_us must be non-zero"));
        }
        if !self.noticed_channels.iter().any(|&n| n) {
            return Err(EmonError::InvalidConfig("no current channel is noticed"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_rejects_non_prescaler_values() {
        assert!(ClockDivisor::new(64).is_ok());
        assert!(ClockDivisor::new(128).is_ok());
        assert_eq!(
            ClockDivisor::new(100),
            Err(EmonError::UnsupportedDivisor(100))
        );
        assert_eq!(ClockDivisor::new(256), Err(EmonError::UnsupportedDivisor(256)));
        assert_eq!(ClockDivisor::new(0), Err(EmonError::UnsupportedDivisor(0)));
    }

    #[test]
    fn divisor_rates_match_reference_hardware() {
        let d128 = ClockDivisor::new(128).unwrap();
        assert_eq!(d128.conversions_per_sec(), 9615);
        assert_eq!(d128.samples_for(10 * SECS), 19230);

        let d64 = ClockDivisor::new(64).unwrap();
        assert_eq!(d64.conversions_per_sec(), 19230);
        assert_eq!(d64.conversion_period_ns(), 52_000);
        assert_eq!(d64.samples_for(10 * SECS), 38460);
    }

    #[test]
    fn emontx3_calibration_scales() {
        let cal = Calibration::emontx3(MainsVoltage::V240, 10);
        let expected_v = 230.0 / 11.116 * 13.0 * 3.3 / 1024.0;
        assert!((cal.voltage_scale - expected_v).abs() < 1e-6);
        assert!((cal.current_scale[0] - 2000.0 * 3.3 / 1024.0 / 22.0).abs() < 1e-6);
        assert!((cal.current_scale[3] - 2000.0 * 3.3 / 1024.0 / 120.0).abs() < 1e-6);
    }

    #[test]
    fn config_validation() {
        assert!(ProcessorConfig::default().validate().is_ok());

        let mut config = ProcessorConfig::default();
        config.noticed_channels = [false; CURRENT_CHANNELS];
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::default();
        config.stat_window_us = 0;
        assert!(config.validate().is_err());
    }
}
