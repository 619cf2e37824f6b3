//! Interrupt-driven multi-channel sampler
//!
//! The ADC converts one channel at a time. On every conversion-complete
//! interrupt the platform calls [`Sampler::on_conversion_complete`] with the
//! raw value; the sampler subtracts the channel's zero offset, stores the
//! value into the sample being assembled and routes the multiplexer to the
//! next channel of the [`ChannelTopology`]. When the next channel is the
//! voltage channel again the sweep is complete: the sample is timestamped and
//! committed to the [`SampleQueue`].
//!
//! All state shared between the interrupt and the main loop lives in one
//! [`critical_section::Mutex`]. Every access, from either side, goes through
//! [`critical_section::with`] and does index arithmetic only.

use core::cell::RefCell;

use critical_section::Mutex;
use log::{error, info};

use crate::config::{CHANNEL_COUNT, ClockDivisor, VOLTAGE_CHANNEL};
use crate::error::EmonError;
use crate::queue::SampleQueue;
use crate::sample::Sample;
use crate::topology::ChannelTopology;

/// Platform side of the sampler: the ADC and its input multiplexer.
pub trait SamplerFrontEnd {
    type Error: core::fmt::Debug;

    /// Arm free-running conversions at `divisor`, converting `first` next,
    /// and enable the conversion-complete interrupt.
    fn start(&mut self, divisor: ClockDivisor, first: usize) -> Result<(), Self::Error>;

    /// Route the multiplexer to `channel` for the next conversion.
    fn select(&mut self, channel: usize);
}

/// What the signal processor needs from the sampler.
///
/// Implemented by [`Sampler`]; tests substitute a recorder.
pub trait SamplerControl {
    /// Set the zero point of `channel`. Only the first non-zero offset sticks.
    fn set_offset(&self, channel: usize, offset: i16) -> bool;
    /// Put every channel back into the scan.
    fn reset_channels(&self);
    fn overflow_count(&self) -> u32;
    fn reset_overflow_counter(&self);
    /// Deepest queue occupancy seen by the consumer since the last reset.
    fn max_depth(&self) -> usize;
    fn reset_max_depth(&self);
}

struct SamplerState {
    topology: ChannelTopology,
    queue: SampleQueue,
    offsets: [i16; CHANNEL_COUNT],
    /// Channel the ADC is converting right now
    current: usize,
    max_depth: usize,
}

impl SamplerState {
    const fn new() -> Self {
        Self {
            topology: ChannelTopology::new(),
            queue: SampleQueue::new(),
            offsets: [0; CHANNEL_COUNT],
            current: VOLTAGE_CHANNEL,
            max_depth: 0,
        }
    }
}

/// Shared sampler state, meant to live in a `static`.
///
/// ```rust,ignore
/// static SAMPLER: Sampler = Sampler::new();
///
/// // ADC interrupt
/// SAMPLER.on_conversion_complete(raw, now_us, &mut front_end);
///
/// // Main loop
/// while let Some(sample) = SAMPLER.next_reading() { /* ... */ }
/// ```
pub struct Sampler {
    state: Mutex<RefCell<SamplerState>>,
}

impl Sampler {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SamplerState::new())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SamplerState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// Re-enable every channel, drop queued samples and start free-running
    /// conversions from the voltage channel.
    ///
    /// Must be called before any reading is produced.
    pub fn configure<F: SamplerFrontEnd>(
        &self,
        divisor: ClockDivisor,
        front_end: &mut F,
    ) -> Result<(), EmonError> {
        self.with(|s| {
            s.topology.reset();
            s.queue.clear();
            s.current = VOLTAGE_CHANNEL;
            s.max_depth = 0;
        });

        front_end.start(divisor, VOLTAGE_CHANNEL).map_err(|e| {
            error!("ADC front end failed to start: {:?}", e);
            EmonError::FrontEnd
        })?;

        info!(
            "Sampler armed: divisor {}, {} conversions/s",
            divisor.get(),
            divisor.conversions_per_sec()
        );
        Ok(())
    }

    /// Conversion-complete interrupt body.
    ///
    /// `raw` is the value converted for the channel selected by the previous
    /// call, `now_us` the monotonic microsecond counter.
    pub fn on_conversion_complete<F: SamplerFrontEnd>(
        &self,
        raw: u16,
        now_us: u32,
        front_end: &mut F,
    ) {
        let next = self.with(|s| {
            let channel = s.current;
            let value = (raw as i16).wrapping_sub(s.offsets[channel]);
            s.queue.assembling().values[channel] = value;

            // A channel removed while being converted completes the sweep
            let next = s.topology.next(channel).unwrap_or(VOLTAGE_CHANNEL);
            if next == VOLTAGE_CHANNEL {
                s.queue.commit(now_us);
            }
            s.current = next;
            next
        });

        front_end.select(next);
    }

    /// Zero point of `channel`, applied at capture time.
    ///
    /// Accepted only for a valid channel that has no offset yet; the first
    /// caller wins.
    pub fn set_offset(&self, channel: usize, offset: i16) -> bool {
        if channel >= CHANNEL_COUNT {
            return false;
        }
        self.with(|s| {
            if s.offsets[channel] != 0 {
                return false;
            }
            s.offsets[channel] = offset;
            true
        })
    }

    pub fn offset(&self, channel: usize) -> Option<i16> {
        if channel >= CHANNEL_COUNT {
            return None;
        }
        Some(self.with(|s| s.offsets[channel]))
    }

    /// Take `channel` out of the scan. The voltage channel cannot be removed.
    pub fn disable_channel(&self, channel: usize) -> bool {
        self.with(|s| s.topology.remove(channel))
    }

    /// Restore the default scan over every channel.
    pub fn reset_channels(&self) {
        self.with(|s| s.topology.reset());
    }

    pub fn is_channel_enabled(&self, channel: usize) -> bool {
        self.with(|s| s.topology.is_enabled(channel))
    }

    /// Samples waiting for the consumer.
    pub fn depth(&self) -> usize {
        self.with(|s| s.queue.depth())
    }

    /// Pop the oldest complete sample without blocking.
    pub fn next_reading(&self) -> Option<Sample> {
        self.with(|s| {
            let sample = s.queue.pop()?;
            let depth = s.queue.depth();
            if depth > s.max_depth {
                s.max_depth = depth;
            }
            Some(sample)
        })
    }

    pub fn overflow_count(&self) -> u32 {
        self.with(|s| s.queue.overflows())
    }

    pub fn reset_overflow_counter(&self) {
        self.with(|s| s.queue.reset_overflows());
    }

    pub fn max_depth(&self) -> usize {
        self.with(|s| s.max_depth)
    }

    pub fn reset_max_depth(&self) {
        self.with(|s| s.max_depth = 0);
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplerControl for Sampler {
    fn set_offset(&self, channel: usize, offset: i16) -> bool {
        Sampler::set_offset(self, channel, offset)
    }

    fn reset_channels(&self) {
        Sampler::reset_channels(self)
    }

    fn overflow_count(&self) -> u32 {
        Sampler::overflow_count(self)
    }

    fn reset_overflow_counter(&self) {
        Sampler::reset_overflow_counter(self)
    }

    fn max_depth(&self) -> usize {
        Sampler::max_depth(self)
    }

    fn reset_max_depth(&self) {
        Sampler::reset_max_depth(self)
    }
}
