#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Event, Input, InputConfig, Io, Pull};
use esp_hal::handler;
use esp_hal::time::Instant;
use esp_hal::timer::PeriodicTimer;
use esp_hal::timer::timg::TimerGroup;
use log::{info, warn};

use emon_core::config::{Calibration, ClockDivisor, MainsVoltage, ProcessorConfig, SECS};
use emon_core::processor::{Processor, State};
use emon_core::pulse::PulseCounter;
use emon_core::report::TextReportWriter;
use emon_core::sampler::Sampler;
use emon_firmware::adc::{ADC_BITS, AdcInputs, TimerPacedAdc};
use emon_firmware::reports::{ChannelSink, ReportChannel, RttOut};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

/// Processing loop poll interval. The sample queue holds about 4 ms of
/// samples at the default divisor.
const POLL_INTERVAL: Duration = Duration::from_micros(500);

static SAMPLER: Sampler = Sampler::new();
static PULSES: PulseCounter = PulseCounter::new(SECS);
static REPORTS: ReportChannel = ReportChannel::new();

static FRONT_END: Mutex<RefCell<Option<TimerPacedAdc>>> = Mutex::new(RefCell::new(None));
static PULSE_PIN: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

#[handler]
fn adc_tick() {
    critical_section::with(|cs| {
        if let Some(front_end) = FRONT_END.borrow_ref_mut(cs).as_mut() {
            front_end.on_timer(&SAMPLER);
        }
    });
}

#[handler]
fn pulse_edge() {
    critical_section::with(|cs| {
        if let Some(pin) = PULSE_PIN.borrow_ref_mut(cs).as_mut() {
            if pin.is_interrupt_set() {
                let now_ms = Instant::now().duration_since_epoch().as_millis() as u32;
                PULSES.on_falling_edge(now_ms);
                pin.clear_interrupt();
            }
        }
    });
}

#[embassy_executor::task]
async fn write_reports() {
    let mut writer = TextReportWriter::new(RttOut);
    loop {
        let report = REPORTS.receive().await;
        writer.write_report(&report);
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);
    info!("Embassy initialized");

    // DIP switch pulled low selects 120 V mains
    let dip = Input::new(
        peripherals.GPIO9,
        InputConfig::default().with_pull(Pull::Up),
    );
    let mains = if dip.is_low() {
        MainsVoltage::V120
    } else {
        MainsVoltage::V240
    };
    let calibration = Calibration::emontx3(mains, ADC_BITS);

    // Utility meter pulses on a falling edge
    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(pulse_edge);
    let mut pulse_pin = Input::new(
        peripherals.GPIO6,
        InputConfig::default().with_pull(Pull::Up),
    );
    critical_section::with(|cs| {
        pulse_pin.listen(Event::FallingEdge);
        PULSE_PIN.borrow_ref_mut(cs).replace(pulse_pin);
    });

    // ADC1 conversions paced by TIMG1
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    let mut timer = PeriodicTimer::new(timg1.timer0);
    timer.set_interrupt_handler(adc_tick);
    let inputs = AdcInputs::new(
        peripherals.ADC1,
        peripherals.GPIO1,
        peripherals.GPIO2,
        peripherals.GPIO3,
        peripherals.GPIO4,
        peripherals.GPIO5,
    );

    let divisor = ClockDivisor::DEFAULT;
    critical_section::with(|cs| {
        let mut slot = FRONT_END.borrow_ref_mut(cs);
        let front_end = slot.insert(TimerPacedAdc::new(inputs, timer));
        SAMPLER.configure(divisor, front_end)
    })
    .expect("Failed to start ADC sampling");

    let mut processor = Processor::new(ProcessorConfig::default(), calibration, divisor)
        .expect("Invalid processor configuration");

    spawner.spawn(write_reports().expect("report writer task"));

    let mut sink = ChannelSink::new(&REPORTS);
    processor.announce(&mut sink);

    // -----------------------------------------------------------------------
    // Processing loop
    // -----------------------------------------------------------------------
    let mut state = State::INITIAL;
    let mut dropped = 0;
    loop {
        PULSES.record();
        while let Some(sample) = SAMPLER.next_reading() {
            state = processor.step(state, &sample, &SAMPLER, &mut sink, &PULSES);
        }

        if sink.dropped() != dropped {
            warn!("{} reports dropped", sink.dropped().wrapping_sub(dropped));
            dropped = sink.dropped();
        }
        Timer::after(POLL_INTERVAL).await;
    }
}
