//! Round-robin scan order over the ADC channels
//!
//! The scan is a doubly linked cycle stored in two small index arrays, so a
//! channel can be unlinked in O(1) while the interrupt handler keeps walking
//! the remaining cycle. A removed channel has no links at all.
//!
//! The topology itself is plain data. Sharing it with the interrupt handler is
//! the [`Sampler`](crate::sampler::Sampler)'s job: it only mutates the
//! topology inside its critical section.

use crate::config::{CHANNEL_COUNT, VOLTAGE_CHANNEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTopology {
    next: [Option<u8>; CHANNEL_COUNT],
    prev: [Option<u8>; CHANNEL_COUNT],
}

impl ChannelTopology {
    /// Default cycle: every channel, in index order.
    pub const fn new() -> Self {
        let mut next = [None; CHANNEL_COUNT];
        let mut prev = [None; CHANNEL_COUNT];
        let mut ch = 0;
        while ch < CHANNEL_COUNT {
            next[ch] = Some(((ch + 1) % CHANNEL_COUNT) as u8);
            prev[ch] = Some(((ch + CHANNEL_COUNT - 1) % CHANNEL_COUNT) as u8);
            ch += 1;
        }
        Self { next, prev }
    }

    /// Restore the default all-enabled cycle.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Unlink `channel` from the cycle.
    ///
    /// Returns `false` without touching anything for the voltage channel,
    /// an out-of-range index or a channel that is already removed.
    pub fn remove(&mut self, channel: usize) -> bool {
        if channel == VOLTAGE_CHANNEL || channel >= CHANNEL_COUNT {
            return false;
        }
        let (Some(next), Some(prev)) = (self.next[channel], self.prev[channel]) else {
            return false;
        };

        // Heal the cycle around the removed channel
        self.next[prev as usize] = Some(next);
        self.prev[next as usize] = Some(prev);
        self.next[channel] = None;
        self.prev[channel] = None;
        true
    }

    /// Channel visited after `channel`, or `None` if it is not in the cycle.
    pub fn next(&self, channel: usize) -> Option<usize> {
        self.next.get(channel).copied().flatten().map(usize::from)
    }

    /// Channel visited before `channel`, or `None` if it is not in the cycle.
    pub fn prev(&self, channel: usize) -> Option<usize> {
        self.prev.get(channel).copied().flatten().map(usize::from)
    }

    pub fn is_enabled(&self, channel: usize) -> bool {
        self.next(channel).is_some()
    }

    /// Number of channels in the cycle.
    pub fn enabled_count(&self) -> usize {
        self.next.iter().filter(|n| n.is_some()).count()
    }
}

impl Default for ChannelTopology {
    fn default() -> Self {
        Self::new()
    }
}
