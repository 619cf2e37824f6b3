//! Host-facing configuration errors
//!
//! The measurement pipeline itself never fails: queue overflows, missing
//! signals and numerical hazards are recovered from in place. Only the setup
//! calls a host makes can be rejected.

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmonError {
    #[error("Unsupported ADC clock divisor: {0}")]
    UnsupportedDivisor(u16),
    #[error("ADC front end failed to start")]
    FrontEnd,
    #[error("Invalid processor configuration: {0}")]
    InvalidConfig(&'static str),
}
