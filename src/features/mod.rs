//! Features module
//!
//! Derived microstructure features and forward targets computed over the
//! sampled snapshot sequence of each instrument.

mod engine;
pub mod estimators;
mod targets;
pub mod technical;
mod types;

pub use engine::FeatureEngine;
pub use estimators::MarketImpact;
pub use targets::{Direction, PendingTargets, TargetState, TargetStatus, TargetValue};
pub use technical::TechnicalIndicators;
pub use types::{FeatureLayout, FeatureRecord, HorizonReturn, WindowVolatility};
