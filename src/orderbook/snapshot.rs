//! Sampled order book snapshot

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Book state sampled at a boundary of the instrument's clock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub instrument_id: String,
    pub session_id: u64,
    pub sample_time: DateTime<Utc>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_bid_size: Option<Decimal>,
    pub best_ask_size: Option<Decimal>,
    /// Top levels, best first: (price, quantity)
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    /// Quantity within each configured band of mid price
    pub bid_depth_by_band: Vec<Decimal>,
    pub ask_depth_by_band: Vec<Decimal>,
    /// Quantity across the retained top levels
    pub bid_depth_total: Decimal,
    pub ask_depth_total: Decimal,
    pub microprice: Option<Decimal>,
    pub is_crossed: bool,
    /// Levels rejected by the outlier filter since the previous sample
    pub outlier_filtered_count: u32,
    pub last_sequence_num: u64,
}

impl Snapshot {
    /// Both sides present and not crossed
    pub fn is_valid(&self) -> bool {
        self.best_bid.is_some() && self.best_ask.is_some() && !self.is_crossed
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(bid: Option<Decimal>, ask: Option<Decimal>, crossed: bool) -> Snapshot {
        Snapshot {
            instrument_id: "BTC-USD".to_string(),
            session_id: 1,
            sample_time: Utc::now(),
            best_bid: bid,
            best_ask: ask,
            best_bid_size: bid.map(|_| dec!(1)),
            best_ask_size: ask.map(|_| dec!(1)),
            bids: vec![],
            asks: vec![],
            bid_depth_by_band: vec![],
            ask_depth_by_band: vec![],
            bid_depth_total: Decimal::ZERO,
            ask_depth_total: Decimal::ZERO,
            microprice: None,
            is_crossed: crossed,
            outlier_filtered_count: 0,
            last_sequence_num: 0,
        }
    }

    #[test]
    fn test_snapshot_mid_and_spread() {
        let snap = snapshot(Some(dec!(100)), Some(dec!(101)), false);
        assert_eq!(snap.mid_price(), Some(dec!(100.5)));
        assert_eq!(snap.spread(), Some(dec!(1)));
        assert!(snap.is_valid());
    }

    #[test]
    fn test_snapshot_one_sided_is_invalid() {
        let snap = snapshot(Some(dec!(100)), None, false);
        assert!(snap.mid_price().is_none());
        assert!(!snap.is_valid());
    }

    #[test]
    fn test_crossed_snapshot_is_invalid() {
        let snap = snapshot(Some(dec!(101)), Some(dec!(100)), true);
        assert!(!snap.is_valid());
    }
}
