//! Order book module
//!
//! Per-instrument L2 book state and sampled snapshots

mod book;
mod snapshot;

pub use book::{ApplyOutcome, BookStatus, OrderBook};
pub use snapshot::Snapshot;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Parse a feed side label ("bid", "buy", "ask", "offer", "sell")
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "bid" | "buy" => Some(Side::Bid),
            "ask" | "offer" | "sell" => Some(Side::Ask),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// A price level change. Zero quantity removes the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            side,
            price,
            quantity,
        }
    }

    pub fn bid(price: Decimal, quantity: Decimal) -> Self {
        Self::new(Side::Bid, price, quantity)
    }

    pub fn ask(price: Decimal, quantity: Decimal) -> Self {
        Self::new(Side::Ask, price, quantity)
    }

    /// Whether this change deletes its level
    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}
