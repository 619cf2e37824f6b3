use core::cell::{Cell, RefCell};

use super::*;
use crate::config::{CHANNEL_COUNT, MainsVoltage, ReportPolicy};
use crate::report::{Report, ReportValue};
use crate::sampler::Sampler;
use crate::synthetic::{SyntheticMains, Waveform};

type Sink = heapless::Vec<Report, 256>;

/// Records the processor's requests to the sampler.
#[derive(Default)]
struct FakeSampler {
    offsets: RefCell<[Option<i16>; CHANNEL_COUNT]>,
    channel_resets: Cell<u32>,
}

impl SamplerControl for FakeSampler {
    fn set_offset(&self, channel: usize, offset: i16) -> bool {
        let mut offsets = self.offsets.borrow_mut();
        if offsets[channel].is_some() {
            return false;
        }
        offsets[channel] = Some(offset);
        true
    }

    fn reset_channels(&self) {
        self.channel_resets.set(self.channel_resets.get() + 1);
    }

    fn overflow_count(&self) -> u32 {
        0
    }

    fn reset_overflow_counter(&self) {}

    fn max_depth(&self) -> usize {
        0
    }

    fn reset_max_depth(&self) {}
}

fn calibration() -> Calibration {
    Calibration::emontx3(MainsVoltage::V240, 10)
}

fn quick_config() -> ProcessorConfig {
    ProcessorConfig {
        stabilize_duration_us: SECS / 100,
        ..ProcessorConfig::debug()
    }
}

/// Last float or integer value reported under `name`.
fn last_value(sink: &Sink, name: &str) -> Option<f32> {
    sink.iter().rev().find_map(|report| match report {
        Report::Value { name: n, value, .. } if n.as_str() == name => Some(match *value {
            ReportValue::Float { value, .. } => value,
            ReportValue::Int32(v) => v as f32,
            ReportValue::Uint32(v) => v as f32,
        }),
        _ => None,
    })
}

fn count_of(sink: &Sink, name: &str) -> usize {
    sink.iter().filter(|r| r.name() == Some(name)).count()
}

/// Vrms·Irms for the given peak ADC counts on the voltage and first CT.
fn expected_apparent(voltage_counts: f32, current_counts: f32) -> f32 {
    let cal = calibration();
    let vrms = voltage_counts * cal.voltage_scale / core::f32::consts::SQRT_2;
    let irms = current_counts * cal.current_scale[0] / core::f32::consts::SQRT_2;
    vrms * irms
}

/// Samples in 30 s of virtual time, plenty for a cold start plus a window.
fn step_limit() -> u32 {
    ClockDivisor::DEFAULT.samples_for(30 * SECS)
}

/// Drives the real sampler from a synthetic front end into the processor.
struct Rig {
    sampler: Sampler,
    mains: SyntheticMains,
    processor: Processor,
    state: State,
    sink: Sink,
}

impl Rig {
    fn new(mains: SyntheticMains, config: ProcessorConfig) -> Self {
        let mut rig = Self {
            sampler: Sampler::new(),
            mains,
            processor: Processor::new(config, calibration(), ClockDivisor::DEFAULT).unwrap(),
            state: State::INITIAL,
            sink: Sink::new(),
        };
        rig.sampler
            .configure(ClockDivisor::DEFAULT, &mut rig.mains)
            .unwrap();
        rig
    }

    fn step(&mut self) -> State {
        self.mains.sweep(&self.sampler).unwrap();
        let sample = self.sampler.next_reading().unwrap();
        self.state = self.processor.step(
            self.state,
            &sample,
            &self.sampler,
            &mut self.sink,
            &(),
        );
        self.state
    }

    /// Step until `done` holds for the new state, at most `limit` samples.
    fn run_until(&mut self, limit: u32, done: impl Fn(&State) -> bool) -> State {
        for _ in 0..limit {
            let state = self.step();
            if done(&state) {
                return state;
            }
        }
        panic!("gave up in state {}", self.state);
    }

    /// Run until `windows` more statistics windows have been calculated.
    fn run_windows(&mut self, windows: u32) {
        for _ in 0..windows {
            self.run_until(step_limit(), |s| matches!(s, State::StatCalc { .. }));
            self.step();
        }
    }
}

#[test]
fn cold_start_leaves_stabilize_exactly_at_threshold() {
    let config = ProcessorConfig {
        stabilize_duration_us: SECS,
        ..ProcessorConfig::default()
    };
    let mut processor = Processor::new(config, calibration(), ClockDivisor::DEFAULT).unwrap();
    let threshold = ClockDivisor::DEFAULT.samples_for(SECS);
    assert_eq!(processor.stabilize_samples(), threshold);

    let sampler = FakeSampler::default();
    let mut sink = Sink::new();
    let mut state = State::INITIAL;
    for n in 1..threshold {
        state = processor.step(state, &Sample::EMPTY, &sampler, &mut sink, &());
        assert_eq!(state, State::Stabilize { seen: n }, "left early at {}", n);
    }

    state = processor.step(state, &Sample::EMPTY, &sampler, &mut sink, &());
    assert_eq!(
        state,
        State::Scan {
            readings: 0,
            start: None
        }
    );
    assert_eq!(sampler.channel_resets.get(), threshold);
    assert!(sink.is_empty());
}

#[test]
fn scan_without_current_signal_falls_back_to_stabilize() {
    // Valid mains voltage, every current transformer input at zero
    let mains =
        SyntheticMains::single_load(50.0, 375.0, 0.0).with_channel(1, Waveform::SILENT);
    let mut rig = Rig::new(mains, quick_config());

    rig.run_until(1000, |s| matches!(s, State::Scan { .. }));
    let state = rig.run_until(ProcessorConfig::default().scan_samples, |s| {
        !matches!(s, State::Scan { .. })
    });

    assert_eq!(state, State::INITIAL);
    let offset = rig.sampler.offset(VOLTAGE_CHANNEL).unwrap();
    assert!((offset - 512).abs() <= 2, "voltage offset {}", offset);
    assert_eq!(rig.sampler.offset(1), Some(0));
}

#[test]
fn scan_without_voltage_falls_back_to_stabilize() {
    let sampler = FakeSampler::default();
    let mut processor = Processor::new(quick_config(), calibration(), ClockDivisor::DEFAULT).unwrap();
    let mut sink = Sink::new();
    let mut state = State::Scan {
        readings: 0,
        start: None,
    };
    for n in 0..processor.config.scan_samples {
        let sample = Sample::new(n * 260, [0, 500, 0, 0, 0]);
        state = processor.step(state, &sample, &sampler, &mut sink, &());
    }
    assert_eq!(state, State::INITIAL);
    assert_eq!(*sampler.offsets.borrow(), [None; CHANNEL_COUNT]);
}

#[test]
fn ignored_channels_do_not_count_as_signal() {
    let sampler = FakeSampler::default();
    let config = ProcessorConfig {
        noticed_channels: [false, true, true, true],
        ..quick_config()
    };
    let mut processor = Processor::new(config, calibration(), ClockDivisor::DEFAULT).unwrap();
    let mut sink = Sink::new();
    let mut state = State::Scan {
        readings: 0,
        start: None,
    };
    for n in 0..processor.config.scan_samples {
        let sample = Sample::new(n * 260, [400, 500, 0, 0, 0]);
        state = processor.step(state, &sample, &sampler, &mut sink, &());
    }
    assert_eq!(state, State::INITIAL);
    assert_eq!(sampler.offsets.borrow()[0], Some(400));
    assert_eq!(sampler.offsets.borrow()[1], None);
}

#[test]
fn scan_measures_offsets_and_sample_period() {
    let sampler = FakeSampler::default();
    let mut processor = Processor::new(quick_config(), calibration(), ClockDivisor::DEFAULT).unwrap();
    let mut sink = Sink::new();
    let mut state = State::Scan {
        readings: 0,
        start: None,
    };
    let scan = processor.config.scan_samples;
    for n in 0..scan {
        let swing = if n % 2 == 0 { 10 } else { -10 };
        let sample = Sample::new(1000 + n * 300, [512 + swing, 0, 300, 0, 7]);
        state = processor.step(state, &sample, &sampler, &mut sink, &());
    }

    assert_eq!(state, State::ZeroSync { discarded: 0 });
    assert_eq!(processor.sample_period_us(), (scan - 1) * 300 / scan);
    let offsets = *sampler.offsets.borrow();
    assert_eq!(offsets, [Some(512), None, Some(300), None, Some(7)]);
    assert!(processor.current_stats(1).unwrap().present);
    assert!(!processor.current_stats(0).unwrap().present);
}

#[test]
fn zero_sync_waits_for_discard_then_rising_crossing() {
    let sampler = FakeSampler::default();
    let mut processor = Processor::new(quick_config(), calibration(), ClockDivisor::DEFAULT).unwrap();
    let mut sink = Sink::new();
    let discard = processor.config.zero_sync_discard;

    // Crossings inside the discard window are ignored
    let mut state = State::ZeroSync { discarded: 0 };
    for n in 0..discard {
        let v = if n % 2 == 0 { -5 } else { 5 };
        state = processor.step(state, &Sample::new(n, [v, 0, 0, 0, 0]), &sampler, &mut sink, &());
    }
    assert_eq!(state, State::ZeroSync { discarded: discard });

    // Last discarded value was positive: no crossing yet
    state = processor.step(state, &Sample::new(100, [3, 0, 0, 0, 0]), &sampler, &mut sink, &());
    assert!(matches!(state, State::ZeroSync { .. }));
    state = processor.step(state, &Sample::new(101, [-3, 0, 0, 0, 0]), &sampler, &mut sink, &());
    state = processor.step(state, &Sample::new(102, [0, 0, 0, 0, 0]), &sampler, &mut sink, &());
    assert_eq!(
        state,
        State::FreqAccum {
            start: 102,
            cycles: 0
        }
    );
}

#[test]
fn full_cycle_reports_in_phase_load() {
    let voltage_counts = 375.0;
    let current_counts = 50.0;
    let mains = SyntheticMains::single_load(50.0, voltage_counts, current_counts);
    let mut rig = Rig::new(mains, quick_config());

    let mut visited: heapless::Vec<&'static str, 8> = heapless::Vec::new();
    let mut windows = 0;
    while windows < 3 {
        let state = rig.step();
        if !visited.contains(&state.name()) {
            visited.push(state.name()).unwrap();
        }
        if matches!(state, State::StatCalc { .. }) {
            windows += 1;
        }
        assert!(rig.mains.now_us() < 30 * SECS, "stuck in {}", state);
    }
    // Let the last window be calculated
    rig.step();
    assert_eq!(
        visited.as_slice(),
        ["STAB", "SCAN", "ZERO", "FREQ", "CALF", "STAT", "CALS"]
    );

    let cal = calibration();
    let vrms = voltage_counts * cal.voltage_scale / core::f32::consts::SQRT_2;
    let irms = current_counts * cal.current_scale[0] / core::f32::consts::SQRT_2;
    let power = vrms * irms;

    let sink = &rig.sink;
    let reported_vrms = last_value(sink, "vrms").unwrap();
    let reported_irms = last_value(sink, "irm0").unwrap();
    let active = last_value(sink, "pac0").unwrap();
    let reactive = last_value(sink, "pre0").unwrap();
    let power_factor = last_value(sink, "pow0").unwrap();

    assert!((reported_vrms - vrms).abs() / vrms < 0.01, "vrms {} vs {}", reported_vrms, vrms);
    assert!((reported_irms - irms).abs() / irms < 0.02, "irms {} vs {}", reported_irms, irms);
    assert!((active - power).abs() / power < 0.02, "pac {} vs {}", active, power);
    assert!(reactive.abs() < 0.02 * power, "pre {} with pac {}", reactive, power);
    assert!(power_factor > 0.98, "pow {}", power_factor);

    let frequency = last_value(sink, "vfrq").unwrap();
    assert!((frequency - 50.0).abs() < 0.25, "vfrq {}", frequency);
    let crest = last_value(sink, "vcrs").unwrap();
    assert!((crest - core::f32::consts::SQRT_2).abs() < 0.05, "vcrs {}", crest);

    // Quadrature correction is measured once, on the first window
    assert_eq!(count_of(sink, "vdel"), 1);
    assert!(rig.processor.mains_fprod() != 0.0);
    // Only the first current channel carries a signal
    assert_eq!(count_of(sink, "irm1"), 0);

    let uptime = last_value(sink, "uptm").unwrap();
    assert!((uptime - (rig.mains.now_us() / SECS) as f32).abs() <= 1.0);
    assert!(rig.processor.energy().active.total_ws() > 0.0);
}

/// Active power, reactive power and power factor of a load on the first CT
/// whose current is shifted by `phase_deg` against the voltage.
fn shifted_load(phase_deg: f32) -> (f32, f32, f32) {
    let mains = SyntheticMains::single_load(50.0, 375.0, 50.0)
        .with_channel(1, Waveform::sine(512.0, 50.0, phase_deg));
    let mut rig = Rig::new(mains, quick_config());
    rig.run_windows(3);

    let sink = &rig.sink;
    (
        last_value(sink, "pac0").unwrap(),
        last_value(sink, "pre0").unwrap(),
        last_value(sink, "pow0").unwrap(),
    )
}

#[test]
fn lagging_load_reports_positive_reactive_power() {
    let apparent = expected_apparent(375.0, 50.0);
    let (cos30, sin30) = (libm::cosf(30f32.to_radians()), 0.5);
    let (active, reactive, power_factor) = shifted_load(-30.0);

    assert!(
        (active - apparent * cos30).abs() < 0.02 * apparent,
        "pac {} vs {}",
        active,
        apparent * cos30
    );
    assert!(
        (reactive - apparent * sin30).abs() < 0.02 * apparent,
        "pre {} vs {}",
        reactive,
        apparent * sin30
    );
    assert!((power_factor - cos30).abs() < 0.01, "pow {}", power_factor);
}

#[test]
fn leading_load_reports_negative_reactive_power() {
    let apparent = expected_apparent(375.0, 50.0);
    let cos30 = libm::cosf(30f32.to_radians());
    let (active, reactive, power_factor) = shifted_load(30.0);

    assert!(
        (active - apparent * cos30).abs() < 0.02 * apparent,
        "pac {} vs {}",
        active,
        apparent * cos30
    );
    assert!(
        (reactive + apparent * 0.5).abs() < 0.02 * apparent,
        "pre {} vs {}",
        reactive,
        -apparent * 0.5
    );
    assert!((power_factor - cos30).abs() < 0.01, "pow {}", power_factor);
}

#[test]
fn report_groups_follow_their_own_periods() {
    let config = ProcessorConfig {
        report: ReportPolicy {
            voltage_period_us: SECS,
            power_period_us: 30 * SECS,
            energy_period_us: 5 * SECS,
            ..ReportPolicy::default()
        },
        ..quick_config()
    };
    let mains = SyntheticMains::single_load(50.0, 375.0, 50.0);
    let mut rig = Rig::new(mains, config);

    // Nothing has been reported yet, so the first window reports everything
    rig.run_windows(1);
    assert_eq!(count_of(&rig.sink, "vrms"), 1);
    assert_eq!(count_of(&rig.sink, "irm0"), 1);
    assert_eq!(count_of(&rig.sink, "enac"), 1);
    let first_irms = last_value(&rig.sink, "irm0").unwrap();
    rig.sink.clear();

    rig.run_windows(3);
    assert_eq!(count_of(&rig.sink, "vrms"), 3, "voltage every window");
    assert_eq!(count_of(&rig.sink, "irm0"), 0, "steady load waits for the power period");
    assert_eq!(count_of(&rig.sink, "enac"), 0, "energy period not yet over");
    assert_eq!(count_of(&rig.sink, "uptm"), 3);

    rig.run_windows(3);
    assert_eq!(count_of(&rig.sink, "enac"), 1, "energy once its period elapsed");
    assert_eq!(count_of(&rig.sink, "irm0"), 0);
    rig.sink.clear();

    // Doubling the load moves the total current far past the delta
    rig.mains.channels[1].amplitude = 100.0;
    rig.run_windows(1);
    assert_eq!(count_of(&rig.sink, "irm0"), 1, "current change forces a power report");
    let irms = last_value(&rig.sink, "irm0").unwrap();
    assert!(
        (irms - 2.0 * first_irms).abs() < 0.02 * 2.0 * first_irms,
        "irm0 {} after doubling {}",
        irms,
        first_irms
    );
}

#[test]
fn full_cycle_across_clock_wrap() {
    let mains = SyntheticMains::single_load(50.0, 375.0, 50.0);
    let mut rig = Rig::new(mains, quick_config());
    // The microsecond counter wraps while the mains period is being measured
    rig.mains.set_time_us(u32::MAX as u64 - 2 * SECS as u64);
    rig.run_windows(3);
    assert!(rig.mains.now_us() < 10 * SECS, "clock did not wrap");

    let frequency = last_value(&rig.sink, "vfrq").unwrap();
    assert!((frequency - 50.0).abs() < 0.25, "vfrq {}", frequency);

    let apparent = expected_apparent(375.0, 50.0);
    let active = last_value(&rig.sink, "pac0").unwrap();
    assert!((active - apparent).abs() / apparent < 0.02, "pac {} vs {}", active, apparent);

    let uptime = rig.processor.uptime_secs();
    assert!((4..10).contains(&uptime), "uptime {}", uptime);
}

#[test]
fn measured_lookback_is_clamped_to_history() {
    let sampler = FakeSampler::default();
    let mut processor = Processor::new(quick_config(), calibration(), ClockDivisor::DEFAULT).unwrap();
    let mut sink = Sink::new();
    // Fast enough sampling that a quarter cycle no longer fits the history
    processor.sample_period_us = 10;

    let state = State::FreqCalc {
        start: 0,
        cycles: 1,
    };
    let sample = Sample::new(20_000, [0; CHANNEL_COUNT]);
    let next = processor.step(state, &sample, &sampler, &mut sink, &());

    assert_eq!(
        next,
        State::StatAccum {
            start: None,
            cycles: 0
        }
    );
    assert_eq!(processor.mains_period_us(), 20_000);
    assert_eq!(processor.lookback(), crate::config::VHIST_SLOTS - 1);
}

#[test]
fn announce_reports_mains_voltage() {
    let processor = Processor::new(quick_config(), calibration(), ClockDivisor::DEFAULT).unwrap();
    let mut sink = Sink::new();
    processor.announce(&mut sink);
    assert_eq!(last_value(&sink, "vman"), Some(240.0));
}

#[test]
fn invalid_config_is_rejected() {
    let config = ProcessorConfig {
        scan_samples: 0,
        ..ProcessorConfig::default()
    };
    assert!(Processor::new(config, calibration(), ClockDivisor::DEFAULT).is_err());
}

#[test]
fn uptime_survives_timestamp_wrap() {
    let mut uptime = Uptime::default();
    uptime.advance(u32::MAX - SECS + 1);
    uptime.advance(SECS);
    assert_eq!(uptime.secs(), 2);
}
