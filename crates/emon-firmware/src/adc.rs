//! Timer-paced ADC1 front end
//!
//! Inputs of the emonTx-style analog board:
//!
//! | channel | pin    | signal                     |
//! |---------|--------|----------------------------|
//! | 0       | GPIO1  | AC adapter voltage         |
//! | 1..=3   | GPIO2-4| CT, 22 Ω burden            |
//! | 4       | GPIO5  | CT, 120 Ω burden           |

use emon_core::config::ClockDivisor;
use emon_core::sampler::{Sampler, SamplerFrontEnd};
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::peripherals::{ADC1, GPIO1, GPIO2, GPIO3, GPIO4, GPIO5};
use esp_hal::time::{Duration, Instant};
use esp_hal::timer::PeriodicTimer;

/// Resolution of ADC1 one-shot reads.
pub const ADC_BITS: u8 = 12;

/// The five analog inputs behind ADC1.
pub struct AdcInputs {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    voltage: AdcPin<GPIO1<'static>, ADC1<'static>>,
    ct1: AdcPin<GPIO2<'static>, ADC1<'static>>,
    ct2: AdcPin<GPIO3<'static>, ADC1<'static>>,
    ct3: AdcPin<GPIO4<'static>, ADC1<'static>>,
    ct4: AdcPin<GPIO5<'static>, ADC1<'static>>,
}

impl AdcInputs {
    pub fn new(
        adc1: ADC1<'static>,
        voltage: GPIO1<'static>,
        ct1: GPIO2<'static>,
        ct2: GPIO3<'static>,
        ct3: GPIO4<'static>,
        ct4: GPIO5<'static>,
    ) -> Self {
        // 11 dB covers the full 0..3.3 V swing of the biased inputs
        let mut config = AdcConfig::new();
        let voltage = config.enable_pin(voltage, Attenuation::_11dB);
        let ct1 = config.enable_pin(ct1, Attenuation::_11dB);
        let ct2 = config.enable_pin(ct2, Attenuation::_11dB);
        let ct3 = config.enable_pin(ct3, Attenuation::_11dB);
        let ct4 = config.enable_pin(ct4, Attenuation::_11dB);

        Self {
            adc: Adc::new(adc1, config),
            voltage,
            ct1,
            ct2,
            ct3,
            ct4,
        }
    }

    /// One blocking conversion of `channel`. A failed read yields zero.
    pub fn convert(&mut self, channel: usize) -> u16 {
        let result = match channel {
            0 => nb::block!(self.adc.read_oneshot(&mut self.voltage)),
            1 => nb::block!(self.adc.read_oneshot(&mut self.ct1)),
            2 => nb::block!(self.adc.read_oneshot(&mut self.ct2)),
            3 => nb::block!(self.adc.read_oneshot(&mut self.ct3)),
            4 => nb::block!(self.adc.read_oneshot(&mut self.ct4)),
            _ => Ok(0),
        };
        result.unwrap_or(0)
    }
}

/// ADC inputs converted one channel per timer interrupt.
pub struct TimerPacedAdc {
    inputs: AdcInputs,
    timer: PeriodicTimer<'static, Blocking>,
    selected: usize,
}

impl TimerPacedAdc {
    /// `timer` must already have its interrupt handler installed.
    pub fn new(inputs: AdcInputs, timer: PeriodicTimer<'static, Blocking>) -> Self {
        Self {
            inputs,
            timer,
            selected: 0,
        }
    }

    /// Timer interrupt body: convert the selected channel and hand the value
    /// to the sampler, which selects the next one.
    pub fn on_timer(&mut self, sampler: &Sampler) {
        self.timer.clear_interrupt();
        let raw = self.inputs.convert(self.selected);
        let now_us = Instant::now().duration_since_epoch().as_micros() as u32;
        sampler.on_conversion_complete(raw, now_us, self);
    }
}

impl SamplerFrontEnd for TimerPacedAdc {
    type Error = esp_hal::timer::Error;

    fn start(&mut self, divisor: ClockDivisor, first: usize) -> Result<(), Self::Error> {
        self.selected = first;
        let period_us = (divisor.conversion_period_ns() / 1000) as u64;
        self.timer.start(Duration::from_micros(period_us))?;
        self.timer.listen();
        Ok(())
    }

    fn select(&mut self, channel: usize) {
        self.selected = channel;
    }
}
