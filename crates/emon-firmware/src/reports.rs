//! Report transport from the processing task to the RTT writer
//!
//! The processor pushes into a bounded channel and never waits; a full
//! channel drops the report.

use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use emon_core::report::{Report, ReportSink, ReportValue};

/// Room for one full report group of every channel plus diagnostics.
pub const REPORT_QUEUE: usize = 32;

pub type ReportChannel = Channel<CriticalSectionRawMutex, Report, REPORT_QUEUE>;

/// [`ReportSink`] feeding a [`ReportChannel`].
pub struct ChannelSink {
    channel: &'static ReportChannel,
    dropped: u32,
}

impl ChannelSink {
    pub const fn new(channel: &'static ReportChannel) -> Self {
        Self {
            channel,
            dropped: 0,
        }
    }

    /// Reports lost to a full channel.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    fn send(&mut self, report: Report) {
        if self.channel.try_send(report).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
        }
    }
}

impl ReportSink for ChannelSink {
    fn push_float(&mut self, name: &str, value: f32, digits: u8, retained: bool) {
        self.send(Report::value(
            name,
            ReportValue::Float { value, digits },
            retained,
        ));
    }

    fn push_int32(&mut self, name: &str, value: i32, retained: bool) {
        self.send(Report::value(name, ReportValue::Int32(value), retained));
    }

    fn push_uint32(&mut self, name: &str, value: u32, retained: bool) {
        self.send(Report::value(name, ReportValue::Uint32(value), retained));
    }

    fn push_break(&mut self) {
        self.send(Report::Break);
    }
}

/// Report text over the RTT print channel.
pub struct RttOut;

impl fmt::Write for RttOut {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        rtt_target::rprint!("{}", s);
        Ok(())
    }
}
