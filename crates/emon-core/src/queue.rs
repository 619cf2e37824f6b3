//! Bounded ring buffer between the ADC interrupt and the main loop
//!
//! The producer assembles a sample in place in the slot under the write
//! cursor, channel by channel, then commits it. Overflow is detected rather
//! than prevented: when the producer advances onto a slot that still holds an
//! unread sample, the read cursor is pushed past it and the overflow counter
//! increments, so the consumer always sees the most recent samples.
//!
//! The queue is plain data; the [`Sampler`](crate::sampler::Sampler) owns it
//! behind a critical section.

use crate::config::QUEUE_SLOTS;
use crate::sample::Sample;

#[derive(Debug, Clone, Copy)]
struct Slot {
    sample: Sample,
    ready: bool,
}

impl Slot {
    const EMPTY: Self = Self {
        sample: Sample::EMPTY,
        ready: false,
    };
}

#[derive(Debug, Clone)]
pub struct SampleQueue<const SLOTS: usize = QUEUE_SLOTS> {
    slots: [Slot; SLOTS],
    write: usize,
    read: usize,
    overflows: u32,
}

impl<const SLOTS: usize> SampleQueue<SLOTS> {
    /// Samples that can wait for the consumer before the oldest is dropped.
    pub const CAPACITY: usize = SLOTS - 1;

    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; SLOTS],
            write: 0,
            read: 0,
            overflows: 0,
        }
    }

    /// Drop everything, including the sample being assembled.
    pub fn clear(&mut self) {
        self.slots = [Slot::EMPTY; SLOTS];
        self.write = 0;
        self.read = 0;
    }

    /// The sample currently being assembled by the producer.
    pub fn assembling(&mut self) -> &mut Sample {
        &mut self.slots[self.write].sample
    }

    /// Finish the sample being assembled and open the next slot.
    ///
    /// Returns `true` if opening the next slot overwrote an unread sample.
    pub fn commit(&mut self, timestamp: u32) -> bool {
        let slot = &mut self.slots[self.write];
        slot.sample.timestamp = timestamp;
        slot.ready = true;

        let next = (self.write + 1) % SLOTS;
        let overflowed = self.slots[next].ready;
        if overflowed {
            // Skip the oldest sample, which is about to be reused
            self.read = (next + 1) % SLOTS;
            self.overflows = self.overflows.wrapping_add(1);
        }

        self.slots[next] = Slot::EMPTY;
        self.write = next;
        overflowed
    }

    /// Assemble and commit a whole sample at once.
    pub fn push(&mut self, sample: Sample) -> bool {
        *self.assembling() = sample;
        self.commit(sample.timestamp)
    }

    /// Take the oldest ready sample, if any.
    pub fn pop(&mut self) -> Option<Sample> {
        let slot = &mut self.slots[self.read];
        if !slot.ready {
            return None;
        }
        slot.ready = false;
        let sample = slot.sample;
        self.read = (self.read + 1) % SLOTS;
        Some(sample)
    }

    /// Number of committed samples waiting, always in `0..SLOTS`.
    pub fn depth(&self) -> usize {
        (self.write + SLOTS - self.read) % SLOTS
    }

    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    pub fn reset_overflows(&mut self) {
        self.overflows = 0;
    }
}

impl<const SLOTS: usize> Default for SampleQueue<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}
