//! Secure random numbers: raw CS words and unbiased bounded sampling.
//! Stateless and safe to call from any thread.

pub mod csrand;
pub mod uniform;

pub use csrand::{csrand, try_csrand, try_csrand_from};
pub use uniform::{csrand_interval, csrand_uniform, interval_with, uniform_with};
