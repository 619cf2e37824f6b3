//! Utility meter pulse input
//!
//! A falling edge on the pulse pin is one meter pulse. Edges closer than
//! [`MIN_PULSE_WIDTH_MS`] to the previous edge are contact bounce and do not
//! count; every edge, counted or not, restarts the debounce interval.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::report::ReportSink;

/// [ms] edges arriving sooner than this after the previous edge are ignored
pub const MIN_PULSE_WIDTH_MS: u32 = 110;

/// Hook called by the processor whenever it emitted a report group.
pub trait PulseReport {
    fn report_if_due(&self, now_us: u32, sink: &mut dyn ReportSink);
}

/// No pulse input fitted.
impl PulseReport for () {
    fn report_if_due(&self, _now_us: u32, _sink: &mut dyn ReportSink) {}
}

struct PulseState {
    /// Pulses seen by the interrupt, not yet folded into `count`
    ticks: u8,
    last_edge_ms: u32,
    count: u32,
    last_reported: u32,
    last_report_us: Option<u32>,
}

pub struct PulseCounter {
    period_us: u32,
    state: Mutex<RefCell<PulseState>>,
}

impl PulseCounter {
    /// `period_us` is the minimum spacing of two reports of a changed count.
    pub const fn new(period_us: u32) -> Self {
        Self {
            period_us,
            state: Mutex::new(RefCell::new(PulseState {
                ticks: 0,
                last_edge_ms: 0,
                count: 0,
                last_reported: 0,
                last_report_us: None,
            })),
        }
    }

    /// Falling-edge interrupt body.
    pub fn on_falling_edge(&self, now_ms: u32) {
        critical_section::with(|cs| {
            let mut s = self.state.borrow_ref_mut(cs);
            if now_ms.wrapping_sub(s.last_edge_ms) > MIN_PULSE_WIDTH_MS {
                s.ticks = s.ticks.wrapping_add(1);
            }
            s.last_edge_ms = now_ms;
        });
    }

    /// Move pulses seen by the interrupt into the lifetime count.
    pub fn record(&self) {
        critical_section::with(|cs| {
            let mut s = self.state.borrow_ref_mut(cs);
            s.count = s.count.wrapping_add(s.ticks as u32);
            s.ticks = 0;
        });
    }

    /// Lifetime pulses recorded so far.
    pub fn count(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).count)
    }
}

impl PulseReport for PulseCounter {
    /// Reports `pulse` the first time, then only once the period has passed
    /// and the count changed.
    fn report_if_due(&self, now_us: u32, sink: &mut dyn ReportSink) {
        let due = critical_section::with(|cs| {
            let mut s = self.state.borrow_ref_mut(cs);
            let due = match s.last_report_us {
                None => true,
                Some(t) => now_us.wrapping_sub(t) > self.period_us && s.count != s.last_reported,
            };
            if due {
                s.last_report_us = Some(now_us);
                s.last_reported = s.count;
            }
            due.then_some(s.count)
        });

        if let Some(count) = due {
            sink.push_uint32("pulse", count, false);
            sink.push_break();
        }
    }
}
