//! Hardware-independent core of the continuous-sampling energy monitor
//!
//! This crate contains all platform-agnostic logic: the interrupt-side
//! sampler that assembles multi-channel samples into a bounded ring buffer,
//! and the signal-processing state machine that turns those samples into
//! calibrated RMS voltage/current, active/reactive power, mains frequency and
//! lifetime energy.
//!
//! It is `#![no_std]` so it compiles on both embedded targets (ESP32-S3) and
//! desktop hosts (for the simulator and tests).

#![no_std]

pub mod config;
pub mod energy;
pub mod error;
pub mod processor;
pub mod pulse;
pub mod queue;
pub mod report;
pub mod sample;
pub mod sampler;
pub mod stats;
#[cfg(any(test, feature = "synthetic"))]
pub mod synthetic;
pub mod topology;
pub mod vhist;

pub use error::EmonError;
