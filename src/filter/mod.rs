//! Filter module
//!
//! Rejects implausible price levels before they reach book state.

mod outlier;

pub use outlier::{FilterDecision, OutlierFilter};
