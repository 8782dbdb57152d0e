//! Order book state management

use super::{PriceLevel, Side, Snapshot};
use crate::config::BookConfig;
use crate::normalizer::{BookEvent, BookEventKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Lifecycle of a book within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStatus {
    /// Nothing applied yet
    Empty,
    /// Levels mirror the feed
    Live,
    /// State discarded after a sequence regression; updates are ignored
    /// until the next full snapshot
    AwaitingSnapshot,
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Level changes written to the book
    pub applied: usize,
    /// Level changes refused by the admission check
    pub rejected: usize,
    /// Event dropped because the book awaits a snapshot
    pub ignored: bool,
    /// Level tables were cleared before applying
    pub cleared: bool,
}

/// L2 aggregated order book for one instrument
///
/// Bids and asks are kept in `BTreeMap`s keyed by price, so the best bid is
/// the last bid key and the best ask the first ask key. Quantities stored are
/// always positive: a zero-quantity change removes its level.
#[derive(Debug, Clone)]
pub struct OrderBook {
    instrument_id: String,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    status: BookStatus,
    session_id: u64,
    last_sequence_num: u64,
    /// Sequence number of the full snapshot batch being assembled
    batch_sequence: Option<u64>,
    updated_at: Option<DateTime<Utc>>,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new(instrument_id: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            status: BookStatus::Empty,
            session_id: 0,
            last_sequence_num: 0,
            batch_sequence: None,
            updated_at: None,
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn status(&self) -> BookStatus {
        self.status
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn last_sequence_num(&self) -> u64 {
        self.last_sequence_num
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Tag subsequent state with a new session
    pub fn set_session(&mut self, session_id: u64) {
        self.session_id = session_id;
    }

    /// Drop all levels and wait for the next full snapshot
    pub fn discard(&mut self, session_id: u64) {
        self.bids.clear();
        self.asks.clear();
        self.batch_sequence = None;
        self.session_id = session_id;
        self.status = BookStatus::AwaitingSnapshot;
    }

    /// Apply an event without an admission check
    pub fn apply(&mut self, event: &BookEvent) -> ApplyOutcome {
        self.apply_with(event, |_| true)
    }

    /// Apply an event, consulting `admit` for each incremental level change
    ///
    /// A full snapshot clears the book when it starts a new batch (a sequence
    /// number different from the batch in progress) and is applied in full.
    pub fn apply_with<F>(&mut self, event: &BookEvent, mut admit: F) -> ApplyOutcome
    where
        F: FnMut(&PriceLevel) -> bool,
    {
        let mut outcome = ApplyOutcome::default();

        match event.kind {
            BookEventKind::FullSnapshot => {
                if self.batch_sequence != Some(event.sequence_num) {
                    self.bids.clear();
                    self.asks.clear();
                    self.batch_sequence = Some(event.sequence_num);
                    outcome.cleared = true;
                }
                for level in &event.levels {
                    self.set_level(level);
                    outcome.applied += 1;
                }
            }
            BookEventKind::IncrementalUpdate => {
                self.batch_sequence = None;
                if self.status == BookStatus::AwaitingSnapshot {
                    outcome.ignored = true;
                    return outcome;
                }
                for level in &event.levels {
                    if admit(level) {
                        self.set_level(level);
                        outcome.applied += 1;
                    } else {
                        outcome.rejected += 1;
                    }
                }
            }
        }

        self.status = BookStatus::Live;
        self.last_sequence_num = event.sequence_num;
        self.updated_at = Some(event.source_time);
        outcome
    }

    /// Upsert or delete a single level
    fn set_level(&mut self, level: &PriceLevel) {
        let table = match level.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        if level.quantity <= Decimal::ZERO {
            table.remove(&level.price);
        } else {
            table.insert(level.price, level.quantity);
        }
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Get best bid size
    pub fn best_bid_size(&self) -> Option<Decimal> {
        self.bids.values().next_back().copied()
    }

    /// Get best ask size
    pub fn best_ask_size(&self) -> Option<Decimal> {
        self.asks.values().next().copied()
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get spread
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Best bid at or above best ask
    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid(), self.best_ask()), (Some(bid), Some(ask)) if bid >= ask)
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    /// Top `n` bids, best first
    pub fn top_bids(&self, n: usize) -> Vec<(Decimal, Decimal)> {
        self.bids.iter().rev().take(n).map(|(p, q)| (*p, *q)).collect()
    }

    /// Top `n` asks, best first
    pub fn top_asks(&self, n: usize) -> Vec<(Decimal, Decimal)> {
        self.asks.iter().take(n).map(|(p, q)| (*p, *q)).collect()
    }

    /// Depth-weighted price at the best level, weighted by the opposite side's size
    pub fn microprice(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let bid_size = self.best_bid_size()?;
        let ask_size = self.best_ask_size()?;
        microprice(bid, ask, bid_size, ask_size)
    }

    /// Quantity resting within `band_pct` percent of `mid` on one side
    ///
    /// Range scan over the ordered table; levels outside the band are never visited.
    pub fn depth_within(&self, side: Side, mid: Decimal, band_pct: Decimal) -> Decimal {
        let Some(offset) = mid
            .checked_mul(band_pct)
            .and_then(|v| v.checked_div(HUNDRED))
        else {
            return Decimal::ZERO;
        };
        match side {
            Side::Bid => sum_quantities(self.bids.range(mid - offset..).map(|(_, q)| q)),
            Side::Ask => sum_quantities(self.asks.range(..=mid + offset).map(|(_, q)| q)),
        }
    }

    /// Read the book as of `sample_time` without mutating it
    pub fn snapshot_at(
        &self,
        sample_time: DateTime<Utc>,
        outlier_filtered_count: u32,
        config: &BookConfig,
    ) -> Snapshot {
        let bids = self.top_bids(config.top_levels);
        let asks = self.top_asks(config.top_levels);

        let (bid_depth_by_band, ask_depth_by_band) = match self.mid_price() {
            Some(mid) => config
                .depth_bands_pct
                .iter()
                .map(|band| {
                    (
                        self.depth_within(Side::Bid, mid, *band),
                        self.depth_within(Side::Ask, mid, *band),
                    )
                })
                .unzip(),
            None => (
                vec![Decimal::ZERO; config.depth_bands_pct.len()],
                vec![Decimal::ZERO; config.depth_bands_pct.len()],
            ),
        };

        Snapshot {
            instrument_id: self.instrument_id.clone(),
            session_id: self.session_id,
            sample_time,
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            best_bid_size: self.best_bid_size(),
            best_ask_size: self.best_ask_size(),
            bid_depth_total: sum_quantities(bids.iter().map(|(_, q)| q)),
            ask_depth_total: sum_quantities(asks.iter().map(|(_, q)| q)),
            bids,
            asks,
            bid_depth_by_band,
            ask_depth_by_band,
            microprice: self.microprice(),
            is_crossed: self.is_crossed(),
            outlier_filtered_count,
            last_sequence_num: self.last_sequence_num,
        }
    }
}

/// `(bid × ask_size + ask × bid_size) / (bid_size + ask_size)`
pub(crate) fn microprice(
    bid: Decimal,
    ask: Decimal,
    bid_size: Decimal,
    ask_size: Decimal,
) -> Option<Decimal> {
    let total = bid_size.checked_add(ask_size)?;
    if total <= Decimal::ZERO {
        return Some((bid + ask) / Decimal::TWO);
    }
    let weighted = bid
        .checked_mul(ask_size)?
        .checked_add(ask.checked_mul(bid_size)?)?;
    weighted.checked_div(total)
}

fn sum_quantities<'a>(quantities: impl Iterator<Item = &'a Decimal>) -> Decimal {
    quantities.fold(Decimal::ZERO, |acc, q| {
        acc.checked_add(*q).unwrap_or(Decimal::MAX)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-11-07T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn snapshot_event(seq: u64, levels: Vec<PriceLevel>) -> BookEvent {
        BookEvent::snapshot("BTC-TEST", seq, t0(), levels)
    }

    fn update_event(seq: u64, secs: i64, levels: Vec<PriceLevel>) -> BookEvent {
        BookEvent::update("BTC-TEST", seq, t0() + Duration::seconds(secs), levels)
    }

    fn seeded_book() -> OrderBook {
        let mut book = OrderBook::new("BTC-TEST");
        book.apply(&snapshot_event(
            1,
            vec![
                PriceLevel::bid(dec!(100), dec!(1.0)),
                PriceLevel::bid(dec!(99.95), dec!(2.0)),
                PriceLevel::bid(dec!(99), dec!(5.0)),
                PriceLevel::ask(dec!(101), dec!(1.0)),
                PriceLevel::ask(dec!(101.05), dec!(3.0)),
                PriceLevel::ask(dec!(102), dec!(4.0)),
            ],
        ));
        book
    }

    #[test]
    fn test_order_book_new() {
        let book = OrderBook::new("test-token");
        assert_eq!(book.instrument_id(), "test-token");
        assert_eq!(book.status(), BookStatus::Empty);
        assert!(book.best_bid().is_none());
        assert!(book.best_ask().is_none());
        assert!(book.mid_price().is_none());
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_full_snapshot_builds_sorted_book() {
        let book = seeded_book();
        assert_eq!(book.status(), BookStatus::Live);
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.best_ask(), Some(dec!(101)));
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
        assert_eq!(book.spread(), Some(dec!(1)));
        assert_eq!(
            book.top_bids(2),
            vec![(dec!(100), dec!(1.0)), (dec!(99.95), dec!(2.0))]
        );
        assert_eq!(
            book.top_asks(2),
            vec![(dec!(101), dec!(1.0)), (dec!(101.05), dec!(3.0))]
        );
    }

    #[test]
    fn test_new_snapshot_clears_previous_levels() {
        let mut book = seeded_book();
        let outcome = book.apply(&snapshot_event(
            7,
            vec![
                PriceLevel::bid(dec!(50), dec!(1)),
                PriceLevel::ask(dec!(51), dec!(1)),
            ],
        ));
        assert!(outcome.cleared);
        assert_eq!(book.bid_level_count(), 1);
        assert_eq!(book.ask_level_count(), 1);
        assert_eq!(book.best_bid(), Some(dec!(50)));
    }

    #[test]
    fn test_snapshot_batch_with_same_sequence_appends() {
        let mut book = OrderBook::new("BTC-TEST");
        book.apply(&snapshot_event(3, vec![PriceLevel::bid(dec!(100), dec!(1))]));
        let outcome = book.apply(&snapshot_event(3, vec![PriceLevel::ask(dec!(101), dec!(1))]));
        assert!(!outcome.cleared);
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.best_ask(), Some(dec!(101)));
    }

    #[test]
    fn test_update_ends_snapshot_batch() {
        let mut book = OrderBook::new("BTC-TEST");
        book.apply(&snapshot_event(3, vec![PriceLevel::bid(dec!(100), dec!(1))]));
        book.apply(&update_event(3, 1, vec![PriceLevel::ask(dec!(101), dec!(1))]));
        let outcome = book.apply(&snapshot_event(3, vec![PriceLevel::bid(dec!(90), dec!(1))]));
        assert!(outcome.cleared);
        assert_eq!(book.best_bid(), Some(dec!(90)));
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn test_incremental_update_upserts_and_removes() {
        let mut book = seeded_book();
        book.apply(&update_event(
            2,
            1,
            vec![
                PriceLevel::bid(dec!(100), dec!(0)),
                PriceLevel::bid(dec!(99.95), dec!(7)),
                PriceLevel::ask(dec!(100.9), dec!(0.5)),
            ],
        ));
        assert_eq!(book.best_bid(), Some(dec!(99.95)));
        assert_eq!(book.best_bid_size(), Some(dec!(7)));
        assert_eq!(book.best_ask(), Some(dec!(100.9)));
        assert_eq!(book.last_sequence_num(), 2);
    }

    #[test]
    fn test_removing_absent_level_is_noop() {
        let mut book = seeded_book();
        let outcome = book.apply(&update_event(2, 1, vec![PriceLevel::ask(dec!(150), dec!(0))]));
        assert_eq!(outcome.applied, 1);
        assert_eq!(book.ask_level_count(), 3);
    }

    #[test]
    fn test_apply_with_rejects_levels() {
        let mut book = seeded_book();
        let outcome = book.apply_with(
            &update_event(
                2,
                1,
                vec![
                    PriceLevel::bid(dec!(100.5), dec!(1)),
                    PriceLevel::bid(dec!(10), dec!(1)),
                ],
            ),
            |level| level.price > dec!(50),
        );
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(book.bid_level_count(), 4);
        assert_eq!(book.best_bid(), Some(dec!(100.5)));
    }

    #[test]
    fn test_discard_ignores_updates_until_snapshot() {
        let mut book = seeded_book();
        book.discard(2);
        assert_eq!(book.status(), BookStatus::AwaitingSnapshot);
        assert_eq!(book.bid_level_count(), 0);

        let outcome = book.apply(&update_event(5, 1, vec![PriceLevel::bid(dec!(100), dec!(1))]));
        assert!(outcome.ignored);
        assert_eq!(book.bid_level_count(), 0);

        book.apply(&snapshot_event(
            6,
            vec![
                PriceLevel::bid(dec!(100), dec!(1)),
                PriceLevel::ask(dec!(101), dec!(1)),
            ],
        ));
        assert_eq!(book.status(), BookStatus::Live);
        assert_eq!(book.session_id(), 2);
    }

    #[test]
    fn test_crossed_detection() {
        let mut book = seeded_book();
        book.apply(&update_event(2, 1, vec![PriceLevel::bid(dec!(101.5), dec!(1))]));
        assert!(book.is_crossed());

        let snap = book.snapshot_at(t0(), 0, &BookConfig::default());
        assert!(snap.is_crossed);
        assert!(!snap.is_valid());
    }

    #[test]
    fn test_microprice_weights_opposite_size() {
        let mut book = OrderBook::new("BTC-TEST");
        book.apply(&snapshot_event(
            1,
            vec![
                PriceLevel::bid(dec!(100), dec!(3)),
                PriceLevel::ask(dec!(101), dec!(1)),
            ],
        ));
        // (100 * 1 + 101 * 3) / 4 = 100.75, pulled toward the ask by bid pressure
        assert_eq!(book.microprice(), Some(dec!(100.75)));
    }

    #[test]
    fn test_depth_within_bands() {
        let book = seeded_book();
        let mid = book.mid_price().unwrap();
        // 0.1% of 100.5 = 0.1005 -> bids >= 100.3995, asks <= 100.6005
        assert_eq!(book.depth_within(Side::Bid, mid, dec!(0.1)), dec!(0));
        // 0.6% of 100.5 = 0.603 -> bids >= 99.897, asks <= 101.103
        assert_eq!(book.depth_within(Side::Bid, mid, dec!(0.6)), dec!(3.0));
        assert_eq!(book.depth_within(Side::Ask, mid, dec!(0.6)), dec!(4.0));
    }

    #[test]
    fn test_snapshot_at_does_not_mutate() {
        let book = seeded_book();
        let config = BookConfig {
            top_levels: 2,
            depth_bands_pct: vec![dec!(0.6), dec!(2)],
        };
        let snap = book.snapshot_at(t0(), 4, &config);

        assert_eq!(snap.instrument_id, "BTC-TEST");
        assert_eq!(snap.bids.len(), 2);
        assert_eq!(snap.asks.len(), 2);
        assert_eq!(snap.bid_depth_total, dec!(3.0));
        assert_eq!(snap.ask_depth_total, dec!(4.0));
        assert_eq!(snap.bid_depth_by_band, vec![dec!(3.0), dec!(8.0)]);
        assert_eq!(snap.ask_depth_by_band, vec![dec!(4.0), dec!(8.0)]);
        assert_eq!(snap.microprice, Some(dec!(100.5)));
        assert_eq!(snap.outlier_filtered_count, 4);
        assert!(!snap.is_crossed);
        assert_eq!(book.bid_level_count(), 3);
    }

    #[test]
    fn test_one_sided_snapshot() {
        let mut book = OrderBook::new("BTC-TEST");
        book.apply(&snapshot_event(1, vec![PriceLevel::bid(dec!(100), dec!(1))]));
        let snap = book.snapshot_at(t0(), 0, &BookConfig::default());
        assert_eq!(snap.best_bid, Some(dec!(100)));
        assert!(snap.best_ask.is_none());
        assert!(snap.microprice.is_none());
        assert_eq!(snap.bid_depth_by_band, vec![dec!(0), dec!(0)]);
        assert!(!snap.is_valid());
    }

    #[test]
    fn test_btc_test_scenario() {
        let mut book = OrderBook::new("BTC-TEST");
        book.apply(&snapshot_event(
            1,
            vec![
                PriceLevel::bid(dec!(100), dec!(1.0)),
                PriceLevel::ask(dec!(101), dec!(1.0)),
            ],
        ));
        book.apply(&update_event(
            2,
            1,
            vec![
                PriceLevel::bid(dec!(100), dec!(0)),
                PriceLevel::bid(dec!(99), dec!(2.0)),
            ],
        ));

        let snap = book.snapshot_at(t0() + Duration::seconds(1), 0, &BookConfig::default());
        assert_eq!(snap.best_bid, Some(dec!(99)));
        assert!(!snap.is_crossed);
        // (99 * 1 + 101 * 2) / 3
        assert_eq!(snap.microprice, Some(dec!(301) / dec!(3)));
    }
}
