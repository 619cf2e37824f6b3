//! Report sink interface and the line-oriented text format
//!
//! The processor pushes named scalars into a [`ReportSink`] and never looks at
//! what happens to them. `retained` flags a value for latched (MQTT retained
//! style) delivery downstream; it has no effect on measurement.
//!
//! [`TextReportWriter`] renders the serial format of the monitor:
//!
//! ```text
//! vrms:241.37,vfrq:59.998,vcrs:1.414,_adcd:3,_novr:0,_uptm:1234,
//! ```

use core::fmt::{self, Write};

/// Longest report name, e.g. `pulse`.
pub const NAME_LEN: usize = 5;

pub type ReportName = heapless::String<NAME_LEN>;

/// Destination of measurement reports.
pub trait ReportSink {
    fn push_float(&mut self, name: &str, value: f32, digits: u8, retained: bool);
    fn push_int32(&mut self, name: &str, value: i32, retained: bool);
    fn push_uint32(&mut self, name: &str, value: u32, retained: bool);
    /// End of a group of related values.
    fn push_break(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportValue {
    Float { value: f32, digits: u8 },
    Int32(i32),
    Uint32(u32),
}

/// One queued report entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Value {
        name: ReportName,
        value: ReportValue,
        retained: bool,
    },
    Break,
}

impl Report {
    /// Build a value entry. Names longer than [`NAME_LEN`] are truncated.
    pub fn value(name: &str, value: ReportValue, retained: bool) -> Self {
        let mut short = ReportName::new();
        for c in name.chars() {
            if short.push(c).is_err() {
                break;
            }
        }
        Self::Value {
            name: short,
            value,
            retained,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Value { name, .. } => Some(name.as_str()),
            Self::Break => None,
        }
    }
}

impl fmt::Display for Report {
    /// `[_]name:value,` for values, a newline for breaks.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Break => f.write_char('\n'),
            Self::Value {
                name,
                value,
                retained,
            } => {
                if *retained {
                    f.write_char('_')?;
                }
                write!(f, "{}:", name)?;
                match value {
                    ReportValue::Float { value, digits } => {
                        write!(f, "{:.*}", *digits as usize, value)?
                    }
                    ReportValue::Int32(v) => write!(f, "{}", v)?,
                    ReportValue::Uint32(v) => write!(f, "{}", v)?,
                }
                f.write_char(',')
            }
        }
    }
}

/// Renders reports as text into any [`fmt::Write`].
///
/// Consecutive breaks collapse into one, and nothing is written for a break
/// that would start the output.
pub struct TextReportWriter<W: Write> {
    out: W,
    at_line_start: bool,
}

impl<W: Write> TextReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            at_line_start: true,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn write_report(&mut self, report: &Report) {
        if matches!(report, Report::Break) {
            if self.at_line_start {
                return;
            }
            self.at_line_start = true;
        } else {
            self.at_line_start = false;
        }
        // Output that does not fit is dropped, like a full transmit buffer
        let _ = write!(self.out, "{}", report);
    }
}

impl<W: Write> ReportSink for TextReportWriter<W> {
    fn push_float(&mut self, name: &str, value: f32, digits: u8, retained: bool) {
        self.write_report(&Report::value(
            name,
            ReportValue::Float { value, digits },
            retained,
        ));
    }

    fn push_int32(&mut self, name: &str, value: i32, retained: bool) {
        self.write_report(&Report::value(name, ReportValue::Int32(value), retained));
    }

    fn push_uint32(&mut self, name: &str, value: u32, retained: bool) {
        self.write_report(&Report::value(name, ReportValue::Uint32(value), retained));
    }

    fn push_break(&mut self) {
        self.write_report(&Report::Break);
    }
}

/// Collects reports into a bounded list, dropping what does not fit.
impl<const N: usize> ReportSink for heapless::Vec<Report, N> {
    fn push_float(&mut self, name: &str, value: f32, digits: u8, retained: bool) {
        let _ = self.push(Report::value(
            name,
            ReportValue::Float { value, digits },
            retained,
        ));
    }

    fn push_int32(&mut self, name: &str, value: i32, retained: bool) {
        let _ = self.push(Report::value(name, ReportValue::Int32(value), retained));
    }

    fn push_uint32(&mut self, name: &str, value: u32, retained: bool) {
        let _ = self.push(Report::value(name, ReportValue::Uint32(value), retained));
    }

    fn push_break(&mut self) {
        if !matches!(self.last(), Some(Report::Break) | None) {
            let _ = self.push(Report::Break);
        }
    }
}

/// Name of a per-current-channel report, e.g. `pac2`.
pub fn channel_name(prefix: &str, channel: usize) -> ReportName {
    let mut name = ReportName::new();
    let _ = write!(name, "{}{}", prefix, channel);
    name
}
