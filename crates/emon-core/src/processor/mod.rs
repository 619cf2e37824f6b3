//! Signal processor state machine
//!
//! The main loop pops samples from the sampler and feeds each one to
//! [`Processor::step`] together with the current [`State`]. A step never
//! blocks and never fails: missing signals send the machine back to
//! [`State::Stabilize`], everything else is a normal transition.
//!
//! ```text
//! STAB -> SCAN -> ZERO -> FREQ -> CALF -> STAT <-> CALS
//!   ^       |                       |
//!   +-------+-----------------------+  (no signal / no timing)
//! ```
//!
//! Everything that outlives a single state (measured periods, phase factors,
//! running averages, energy, report schedule) is owned by the [`Processor`]
//! itself. Per-state bookkeeping travels inside the [`State`] variants.

mod calc;
mod state;

pub use calc::{phase_factors, quadrature_lookback};
pub use state::State;

use log::{debug, info, warn};

use crate::config::{
    CURRENT_CHANNELS, Calibration, ClockDivisor, ProcessorConfig, SECS, VOLTAGE_CHANNEL,
};
use crate::energy::EnergyAccumulator;
use crate::error::EmonError;
use crate::pulse::PulseReport;
use crate::report::ReportSink;
use crate::sample::Sample;
use crate::sampler::SamplerControl;
use crate::stats::{ReadingStats, RunningAverage};
use crate::vhist::VoltageHistory;

use calc::ReportSchedule;

/// Running total of time covered by samples, tolerant of timestamp wrap.
#[derive(Debug, Clone, Copy, Default)]
struct Uptime {
    last_us: Option<u32>,
    total_us: u64,
}

impl Uptime {
    fn advance(&mut self, now_us: u32) {
        if let Some(last) = self.last_us {
            self.total_us += now_us.wrapping_sub(last) as u64;
        }
        self.last_us = Some(now_us);
    }

    fn secs(&self) -> u32 {
        (self.total_us / SECS as u64) as u32
    }
}

pub struct Processor {
    config: ProcessorConfig,
    calibration: Calibration,
    stabilize_samples: u32,

    vstats: ReadingStats,
    istats: [ReadingStats; CURRENT_CHANNELS],
    /// Voltage of the previous sample, for zero-crossing detection
    last_voltage: i16,
    history: VoltageHistory,

    sample_period_us: u32,
    mains_period_us: u32,
    lookback: usize,
    cos_phase: [f32; CURRENT_CHANNELS],
    sin_phase: [f32; CURRENT_CHANNELS],
    /// Bleed-through of active into raw reactive power; zero until measured
    mains_fprod: f32,

    v_avg: RunningAverage,
    i_avg: [RunningAverage; CURRENT_CHANNELS],
    energy: EnergyAccumulator,
    schedule: ReportSchedule,
    uptime: Uptime,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        calibration: Calibration,
        divisor: ClockDivisor,
    ) -> Result<Self, EmonError> {
        config.validate()?;

        let stabilize_samples = divisor.samples_for(config.stabilize_duration_us);
        info!(
            "Processor: {} V mains, stabilize {} samples, scan {} samples",
            calibration.mains.volts(),
            stabilize_samples,
            config.scan_samples
        );

        Ok(Self {
            config,
            calibration,
            stabilize_samples,
            vstats: ReadingStats::new(),
            istats: [ReadingStats::new(); CURRENT_CHANNELS],
            last_voltage: 0,
            history: VoltageHistory::new(),
            sample_period_us: 0,
            mains_period_us: 0,
            lookback: 0,
            cos_phase: [1.0; CURRENT_CHANNELS],
            sin_phase: [0.0; CURRENT_CHANNELS],
            mains_fprod: 0.0,
            v_avg: RunningAverage::new(),
            i_avg: [RunningAverage::new(); CURRENT_CHANNELS],
            energy: EnergyAccumulator::new(),
            schedule: ReportSchedule::default(),
            uptime: Uptime::default(),
        })
    }

    /// Report the selected mains voltage. Called once at start-up.
    pub fn announce<S: ReportSink>(&self, sink: &mut S) {
        sink.push_int32("vman", self.calibration.mains.volts(), false);
    }

    /// Consume one sample in `state` and return the next state.
    pub fn step<C, S, P>(
        &mut self,
        state: State,
        sample: &Sample,
        sampler: &C,
        sink: &mut S,
        pulse: &P,
    ) -> State
    where
        C: SamplerControl,
        S: ReportSink,
        P: PulseReport,
    {
        self.uptime.advance(sample.timestamp);

        let next = match state {
            State::Stabilize { seen } => self.stabilize(seen, sampler),
            State::Scan { readings, start } => self.scan(readings, start, sample, sampler),
            State::ZeroSync { discarded } => self.zero_sync(discarded, sample, sampler),
            State::FreqAccum { start, cycles } => self.freq_accum(start, cycles, sample),
            State::FreqCalc { start, cycles } => self.freq_calc(start, cycles, sample, sampler),
            State::StatAccum { start, cycles } => self.stat_accum(start, cycles, sample),
            State::StatCalc { start, cycles } => {
                self.stat_calc(start, cycles, sample, sampler, sink, pulse)
            }
        };

        if core::mem::discriminant(&next) != core::mem::discriminant(&state) {
            debug!("State {} -> {}", state, next);
        }
        next
    }

    fn reset_stats(&mut self) {
        self.vstats.reset();
        for stats in self.istats.iter_mut() {
            stats.reset();
        }
    }

    /// Store the voltage in the history and report a rising zero crossing.
    fn track_voltage(&mut self, voltage: i16) -> bool {
        self.history.push(voltage);
        let previous = core::mem::replace(&mut self.last_voltage, voltage);
        previous < 0 && voltage >= 0
    }

    fn stabilize<C: SamplerControl>(&mut self, seen: u32, sampler: &C) -> State {
        sampler.reset_channels();

        let seen = seen + 1;
        if seen < self.stabilize_samples {
            return State::Stabilize { seen };
        }

        info!("Inputs stable after {} samples", seen);
        State::Scan {
            readings: 0,
            start: None,
        }
    }

    fn scan<C: SamplerControl>(
        &mut self,
        readings: u32,
        start: Option<u32>,
        sample: &Sample,
        sampler: &C,
    ) -> State {
        let start = match start {
            Some(start) => start,
            None => {
                self.reset_stats();
                sampler.reset_max_depth();
                sample.timestamp
            }
        };

        let voltage = sample.voltage();
        self.last_voltage = voltage;
        if self.vstats.present || voltage > 0 {
            self.vstats.record_level(voltage);
        }
        for (j, stats) in self.istats.iter_mut().enumerate() {
            let current = sample.current(j);
            if stats.present || current > 0 {
                stats.record_level(current);
            }
        }

        let readings = readings + 1;
        if readings < self.config.scan_samples {
            return State::Scan {
                readings,
                start: Some(start),
            };
        }

        self.sample_period_us = sample.timestamp.wrapping_sub(start) / readings;
        info!("Scan complete, sample period {} us", self.sample_period_us);

        if !self.vstats.shows_signal() {
            warn!("No voltage input, stabilizing again");
            self.reset_stats();
            return State::INITIAL;
        }
        let mean = self.vstats.mean().unwrap_or(0);
        self.vstats.present = true;
        sampler.set_offset(VOLTAGE_CHANNEL, mean);
        info!(
            "Voltage mean {} min/max {}/{}",
            mean, self.vstats.min, self.vstats.max
        );

        let mut found = 0;
        for (j, stats) in self.istats.iter_mut().enumerate() {
            if !self.config.noticed_channels[j] || !stats.shows_signal() {
                continue;
            }
            let mean = stats.mean().unwrap_or(0);
            stats.present = true;
            sampler.set_offset(j + 1, mean);
            found += 1;
            info!(
                "Current {} mean {} min/max {}/{}",
                j, mean, stats.min, stats.max
            );
        }

        self.reset_stats();
        if found == 0 {
            warn!("No current inputs, stabilizing again");
            return State::INITIAL;
        }

        State::ZeroSync { discarded: 0 }
    }

    fn zero_sync<C: SamplerControl>(
        &mut self,
        discarded: u32,
        sample: &Sample,
        sampler: &C,
    ) -> State {
        let discarded = discarded + 1;
        let crossed = self.track_voltage(sample.voltage());

        if discarded > self.config.zero_sync_discard && crossed {
            info!("Zero crossing after {} samples", discarded);
            sampler.reset_max_depth();
            sampler.reset_overflow_counter();
            return State::FreqAccum {
                start: sample.timestamp,
                cycles: 0,
            };
        }

        State::ZeroSync { discarded }
    }

    fn freq_accum(&mut self, start: u32, cycles: u16, sample: &Sample) -> State {
        if !self.track_voltage(sample.voltage()) {
            return State::FreqAccum { start, cycles };
        }

        let cycles = cycles + 1;
        if cycles < self.config.freq_cycles {
            return State::FreqAccum { start, cycles };
        }
        State::FreqCalc { start, cycles }
    }

    fn stat_accum(&mut self, start: Option<u32>, cycles: u16, sample: &Sample) -> State {
        let start = start.unwrap_or(sample.timestamp);

        let voltage = sample.voltage();
        let crossed = self.track_voltage(voltage);
        let lagged = self.history.lookback(self.lookback);

        self.vstats
            .accumulate_voltage(voltage, lagged, self.mains_fprod == 0.0);
        for (j, stats) in self.istats.iter_mut().enumerate() {
            if stats.present {
                stats.accumulate_current(sample.current(j), voltage, lagged);
            }
        }

        if !crossed {
            return State::StatAccum {
                start: Some(start),
                cycles,
            };
        }

        let cycles = cycles.saturating_add(1);
        if sample.timestamp.wrapping_sub(start) < self.config.stat_window_us {
            return State::StatAccum {
                start: Some(start),
                cycles,
            };
        }
        State::StatCalc { start, cycles }
    }

    /// Samples spent in [`State::Stabilize`] before scanning.
    pub fn stabilize_samples(&self) -> u32 {
        self.stabilize_samples
    }

    /// [us] time per sample measured during the scan
    pub fn sample_period_us(&self) -> u32 {
        self.sample_period_us
    }

    /// [us] measured mains period
    pub fn mains_period_us(&self) -> u32 {
        self.mains_period_us
    }

    /// Samples looked back for the quadrature voltage.
    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn mains_fprod(&self) -> f32 {
        self.mains_fprod
    }

    pub fn energy(&self) -> &EnergyAccumulator {
        &self.energy
    }

    /// Results of the last completed window for the voltage channel.
    pub fn voltage_stats(&self) -> &ReadingStats {
        &self.vstats
    }

    pub fn current_stats(&self, channel: usize) -> Option<&ReadingStats> {
        self.istats.get(channel)
    }

    pub fn uptime_secs(&self) -> u32 {
        self.uptime.secs()
    }
}

#[cfg(test)]
mod tests;
