//! Deterministic mains front end for host-side runs
//!
//! [`SyntheticMains`] stands in for the ADC: every channel is a sinusoid
//! around a DC level, converted one channel at a time at the rate given by
//! the clock divisor. Time is virtual and advances by exactly one conversion
//! period per [`tick`](SyntheticMains::tick), so runs are reproducible.

use core::f64::consts::PI;

use crate::config::{CHANNEL_COUNT, ClockDivisor, VOLTAGE_CHANNEL};
use crate::sampler::{Sampler, SamplerFrontEnd};

/// One analog input: `center + amplitude·sin(ωt + phase)` in ADC counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waveform {
    pub center: f32,
    pub amplitude: f32,
    pub phase_deg: f32,
}

impl Waveform {
    /// Input tied to ground.
    pub const SILENT: Self = Self {
        center: 0.0,
        amplitude: 0.0,
        phase_deg: 0.0,
    };

    pub const fn sine(center: f32, amplitude: f32, phase_deg: f32) -> Self {
        Self {
            center,
            amplitude,
            phase_deg,
        }
    }
}

/// Front end has not been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotStarted;

pub struct SyntheticMains {
    pub frequency_hz: f32,
    pub channels: [Waveform; CHANNEL_COUNT],
    /// Largest raw value the converter produces
    pub full_scale: u16,
    period_ns: u64,
    elapsed_ns: u64,
    selected: usize,
    running: bool,
}

impl SyntheticMains {
    /// 10-bit converter with every input grounded.
    pub fn new(frequency_hz: f32) -> Self {
        Self {
            frequency_hz,
            channels: [Waveform::SILENT; CHANNEL_COUNT],
            full_scale: 1023,
            period_ns: 0,
            elapsed_ns: 0,
            selected: VOLTAGE_CHANNEL,
            running: false,
        }
    }

    /// Mains voltage on channel 0 and one in-phase load on the first
    /// current transformer, both centered at mid-scale.
    pub fn single_load(frequency_hz: f32, voltage_counts: f32, current_counts: f32) -> Self {
        let mut mains = Self::new(frequency_hz);
        mains.channels[VOLTAGE_CHANNEL] = Waveform::sine(512.0, voltage_counts, 0.0);
        mains.channels[1] = Waveform::sine(512.0, current_counts, 0.0);
        mains
    }

    pub fn with_channel(mut self, channel: usize, waveform: Waveform) -> Self {
        if let Some(slot) = self.channels.get_mut(channel) {
            *slot = waveform;
        }
        self
    }

    /// Virtual microsecond clock, wrapping like a hardware counter.
    pub fn now_us(&self) -> u32 {
        (self.elapsed_ns / 1000) as u32
    }

    /// Start the virtual clock at `us` instead of zero.
    pub fn set_time_us(&mut self, us: u64) {
        self.elapsed_ns = us * 1000;
    }

    fn convert(&self, channel: usize) -> u16 {
        let waveform = &self.channels[channel];
        let cycles = self.frequency_hz as f64 * self.elapsed_ns as f64 * 1.0e-9;
        let angle = 2.0 * PI * (cycles - libm::floor(cycles))
            + (waveform.phase_deg as f64).to_radians();
        let value = waveform.center as f64 + waveform.amplitude as f64 * libm::sin(angle);
        libm::round(value).clamp(0.0, self.full_scale as f64) as u16
    }

    /// Convert the selected channel, advance one conversion period and hand
    /// the result to the sampler, as the conversion-complete interrupt would.
    pub fn tick(&mut self, sampler: &Sampler) -> Result<(), NotStarted> {
        if !self.running {
            return Err(NotStarted);
        }
        let raw = self.convert(self.selected);
        self.elapsed_ns += self.period_ns;
        let now = self.now_us();
        sampler.on_conversion_complete(raw, now, self);
        Ok(())
    }

    /// Run conversions until the sampler has committed one more sample.
    pub fn sweep(&mut self, sampler: &Sampler) -> Result<(), NotStarted> {
        loop {
            self.tick(sampler)?;
            if self.selected == VOLTAGE_CHANNEL {
                return Ok(());
            }
        }
    }
}

impl SamplerFrontEnd for SyntheticMains {
    type Error = NotStarted;

    fn start(&mut self, divisor: ClockDivisor, first: usize) -> Result<(), NotStarted> {
        self.period_ns = divisor.conversion_period_ns() as u64;
        self.selected = first;
        self.running = true;
        Ok(())
    }

    fn select(&mut self, channel: usize) {
        self.selected = channel;
    }
}
