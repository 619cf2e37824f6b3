//! ESP32-S3 bindings for the energy monitor core
//!
//! The core's sampler expects a conversion-complete interrupt per channel.
//! The ESP32-S3 ADC has no free-running multiplexed mode matching that, so a
//! periodic timer paces one-shot ADC1 conversions at the rate the clock
//! divisor implies, and its interrupt plays the conversion-complete role.

#![no_std]

pub mod adc;
pub mod reports;
