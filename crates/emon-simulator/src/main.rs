//! Desktop simulator for the continuous-sampling energy monitor.
//!
//! Runs the real emon-core sampler and state machine against a synthetic
//! mains supply in virtual time and prints the reports in the serial text
//! format, one line per report group:
//!
//! ```text
//! vrms:229.94,vfrq:50.001,vcrs:1.414,irm0:10.354,pac0:2380.6,...
//! ```
//!
//! Set `RUST_LOG=info` (or `debug`) to see the state machine's progress on
//! stderr next to the reports on stdout.

use std::fmt;
use std::io::{self, Write as _};

use log::{error, info};

use emon_core::config::{
    Calibration, ClockDivisor, MainsVoltage, ProcessorConfig, SECS, VOLTAGE_CHANNEL,
};
use emon_core::processor::{Processor, State};
use emon_core::pulse::PulseCounter;
use emon_core::report::TextReportWriter;
use emon_core::sampler::Sampler;
use emon_core::synthetic::{SyntheticMains, Waveform};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Virtual seconds to simulate.
const SIM_SECONDS: u64 = 180;

/// Mains frequency of the synthetic supply.
const MAINS_HZ: f32 = 50.0;

/// Sweeps the ADC completes between two passes of the main loop. The
/// consumer lagging behind shows up in the `adcd` report.
const BURST_SWEEPS: u32 = 8;

/// One meter pulse per watt-hour at roughly the simulated load.
const PULSE_INTERVAL_MS: u32 = 1_200;

/// Contact bounce following each meter pulse.
const PULSE_BOUNCE_MS: u32 = 20;

// ---------------------------------------------------------------------------
// Shared state, as it would live in statics on the device
// ---------------------------------------------------------------------------

static SAMPLER: Sampler = Sampler::new();
static PULSES: PulseCounter = PulseCounter::new(SECS);

/// A 230 V supply with a resistive heater, an inductive motor, an empty
/// input and a small load on the high-burden transformer.
fn build_mains() -> SyntheticMains {
    SyntheticMains::new(MAINS_HZ)
        .with_channel(VOLTAGE_CHANNEL, Waveform::sine(512.0, 375.0, 0.0))
        .with_channel(1, Waveform::sine(512.0, 50.0, 0.0))
        .with_channel(2, Waveform::sine(512.0, 20.0, -30.0))
        .with_channel(4, Waveform::sine(512.0, 60.0, -5.0))
}

/// Utility meter LED feeding the pulse input.
struct MeterPulses {
    next_ms: u32,
}

impl MeterPulses {
    fn new() -> Self {
        Self {
            next_ms: PULSE_INTERVAL_MS,
        }
    }

    fn advance(&mut self, now_ms: u32) {
        while now_ms >= self.next_ms {
            PULSES.on_falling_edge(self.next_ms);
            PULSES.on_falling_edge(self.next_ms + PULSE_BOUNCE_MS);
            self.next_ms += PULSE_INTERVAL_MS;
        }
    }
}

/// Report text goes to stdout.
struct Stdout;

impl fmt::Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        io::stdout().write_all(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("Starting emon simulator");
    info!(
        "Mains {} Hz, {} virtual seconds, consumer every {} sweeps",
        MAINS_HZ, SIM_SECONDS, BURST_SWEEPS
    );

    let divisor = ClockDivisor::DEFAULT;
    let mut mains = build_mains();
    if let Err(e) = SAMPLER.configure(divisor, &mut mains) {
        error!("Sampler failed to start: {}", e);
        return;
    }

    let calibration = Calibration::emontx3(MainsVoltage::V240, 10);
    let mut processor = match Processor::new(ProcessorConfig::debug(), calibration, divisor) {
        Ok(processor) => processor,
        Err(e) => {
            error!("Invalid processor configuration: {}", e);
            return;
        }
    };

    let mut out = TextReportWriter::new(Stdout);
    processor.announce(&mut out);

    let mut state = State::INITIAL;
    let mut meter = MeterPulses::new();
    let total_sweeps = SIM_SECONDS * divisor.sweeps_per_sec() as u64;
    let mut sweeps = 0u64;

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    while sweeps < total_sweeps {
        // --- ADC interrupts ------------------------------------------------
        for _ in 0..BURST_SWEEPS {
            if let Err(e) = mains.sweep(&SAMPLER) {
                error!("Synthetic front end stopped: {:?}", e);
                return;
            }
        }
        sweeps += BURST_SWEEPS as u64;

        // --- Pulse input ---------------------------------------------------
        meter.advance(mains.now_us() / 1000);
        PULSES.record();

        // --- Signal processing ---------------------------------------------
        while let Some(sample) = SAMPLER.next_reading() {
            state = processor.step(state, &sample, &SAMPLER, &mut out, &PULSES);
        }
    }

    let (active, reactive) = processor.energy().snapshot();
    info!(
        "Simulator exiting in state {}: {} Wh active, {} VArh reactive, {} pulses, {} overflows",
        state,
        active,
        reactive,
        PULSES.count(),
        SAMPLER.overflow_count()
    );
}
