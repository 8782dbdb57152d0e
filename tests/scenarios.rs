//! End-to-end scenarios through the synchronous pipeline

use chrono::{DateTime, Duration, Utc};
use lob_pipeline::config::Config;
use lob_pipeline::features::{FeatureEngine, TargetState, TargetStatus};
use lob_pipeline::normalizer::BookEvent;
use lob_pipeline::orderbook::{BookStatus, OrderBook, PriceLevel, Snapshot};
use lob_pipeline::pipeline::Pipeline;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn t0() -> DateTime<Utc> {
    "2025-11-07T10:00:00Z".parse().unwrap()
}

fn level(kind: &str, side: &str, price: &str, qty: &str, seq: u64, secs: i64) -> String {
    let ts = (t0() + Duration::seconds(secs)).to_rfc3339();
    format!(
        r#"{{"kind":"{kind}","side":"{side}","price":"{price}","quantity":"{qty}","sequence_num":{seq},"timestamp":"{ts}","instrument_id":"BTC-TEST"}}"#
    )
}

fn feed(pipeline: &mut Pipeline, lines: &[String]) -> Vec<lob_pipeline::features::FeatureRecord> {
    lines
        .iter()
        .flat_map(|line| pipeline.process_line(line))
        .collect()
}

#[test]
fn test_btc_test_book_scenario() {
    let mut book = OrderBook::new("BTC-TEST");
    book.apply(&BookEvent::snapshot(
        "BTC-TEST",
        1,
        t0(),
        vec![
            PriceLevel::bid(dec!(100), dec!(1.0)),
            PriceLevel::ask(dec!(101), dec!(1.0)),
        ],
    ));
    assert_eq!(book.microprice(), Some(dec!(100.5)));

    book.apply(&BookEvent::update(
        "BTC-TEST",
        2,
        t0() + Duration::seconds(1),
        vec![
            PriceLevel::bid(dec!(100), dec!(0)),
            PriceLevel::bid(dec!(99), dec!(2.0)),
        ],
    ));

    assert_eq!(book.best_bid(), Some(dec!(99)));
    assert_eq!(book.best_bid_size(), Some(dec!(2.0)));
    assert!(!book.is_crossed());

    // (99 × 1 + 101 × 2) / 3
    let microprice = book.microprice().unwrap();
    assert!((microprice - dec!(100.3333333333)).abs() < dec!(0.0000001));
}

#[test]
fn test_btc_test_pipeline_scenario() {
    let mut pipeline = Pipeline::new(Config::default());
    feed(
        &mut pipeline,
        &[
            level("full_snapshot", "bid", "100", "1.0", 1, 0),
            level("full_snapshot", "ask", "101", "1.0", 1, 0),
            level("incremental_update", "bid", "100", "0", 2, 1),
            level("incremental_update", "bid", "99", "2.0", 2, 1),
        ],
    );

    let state = pipeline.instrument("BTC-TEST").unwrap();
    assert_eq!(state.book().best_bid(), Some(dec!(99)));
    assert!(!state.book().is_crossed());
    assert_eq!(pipeline.stats().rejected_levels, 0);

    let records = pipeline.finish();
    // Only boundary 10:00:00 has been crossed, and it sampled the pre-update book
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].snapshot.best_bid, Some(dec!(100)));
    assert_eq!(records[0].snapshot.microprice, Some(dec!(100.5)));
}

fn valid_snapshot(secs: i64, microprice: Decimal) -> Snapshot {
    Snapshot {
        instrument_id: "BTC-TEST".to_string(),
        session_id: 1,
        sample_time: t0() + Duration::seconds(secs),
        best_bid: Some(microprice - dec!(0.5)),
        best_ask: Some(microprice + dec!(0.5)),
        best_bid_size: Some(dec!(1)),
        best_ask_size: Some(dec!(1)),
        bids: vec![(microprice - dec!(0.5), dec!(1))],
        asks: vec![(microprice + dec!(0.5), dec!(1))],
        bid_depth_by_band: vec![dec!(1), dec!(1)],
        ask_depth_by_band: vec![dec!(1), dec!(1)],
        bid_depth_total: dec!(1),
        ask_depth_total: dec!(1),
        microprice: Some(microprice),
        is_crossed: false,
        outlier_filtered_count: 0,
        last_sequence_num: secs as u64,
    }
}

#[test]
fn test_target_pending_without_future_snapshot() {
    let mut config = Config::default();
    config.sampler.interval_secs = 10;
    config.targets.horizons_secs = vec![60];
    let mut engine = FeatureEngine::new(&config);

    assert!(engine.on_snapshot(valid_snapshot(0, dec!(100.0)), None).is_empty());
    assert!(engine.on_snapshot(valid_snapshot(10, dec!(100.5)), None).is_empty());

    assert_eq!(engine.target_state(t0(), 60), TargetState::Pending);
    assert_eq!(engine.pending_len(), 2);
}

#[test]
fn test_target_ready_after_horizon() {
    let mut config = Config::default();
    config.sampler.interval_secs = 10;
    config.targets.horizons_secs = vec![60];
    let mut engine = FeatureEngine::new(&config);

    let mut emitted = Vec::new();
    for step in 0..=6 {
        let price = dec!(100) + Decimal::from(step) * dec!(0.1);
        emitted.extend(engine.on_snapshot(valid_snapshot(step * 10, price), None));
    }

    assert_eq!(emitted.len(), 1);
    let record = &emitted[0];
    assert_eq!(record.target_status, TargetStatus::Finalized);
    let target = record.targets[0].as_ref().unwrap();
    assert_eq!(target.future_price, dec!(100.6));
    assert!((target.return_pct - 0.006).abs() < 1e-9);
    assert_eq!(target.direction.as_str(), "up");
}

#[test]
fn test_crossed_book_is_excluded() {
    let mut pipeline = Pipeline::new(Config::default());
    let records = feed(
        &mut pipeline,
        &[
            level("full_snapshot", "bid", "101", "1", 1, 0),
            level("full_snapshot", "ask", "100", "1", 1, 0),
            level("incremental_update", "ask", "100", "2", 2, 5),
        ],
    );

    // Excluded records never wait for targets
    assert_eq!(records.len(), 1);
    assert!(pipeline.finish().is_empty());
    assert!(records[0].snapshot.is_crossed);
    assert_eq!(records[0].target_status, TargetStatus::Excluded);
    assert!(records[0].returns.iter().all(|r| r.simple.is_none()));
    assert_eq!(pipeline.stats().crossed_snapshots, 1);
    assert_eq!(pipeline.stats().records_excluded, 1);
}

#[test]
fn test_sequence_regression_discards_book() {
    let mut pipeline = Pipeline::new(Config::default());
    feed(
        &mut pipeline,
        &[
            level("full_snapshot", "bid", "100", "1", 5, 0),
            level("full_snapshot", "ask", "101", "1", 5, 0),
            level("incremental_update", "bid", "100", "2", 6, 1),
            level("incremental_update", "bid", "100", "3", 3, 2),
            level("incremental_update", "bid", "100", "4", 4, 3),
        ],
    );

    let state = pipeline.instrument("BTC-TEST").unwrap();
    assert_eq!(state.book().status(), BookStatus::AwaitingSnapshot);
    assert!(state.book().best_bid().is_none());
    assert_eq!(state.session_id(), 2);
    assert_eq!(pipeline.stats().session_resets, 2);
    assert_eq!(pipeline.stats().ignored_updates, 2);

    // A fresh snapshot restores the book in a new session
    feed(
        &mut pipeline,
        &[
            level("full_snapshot", "bid", "100", "1", 10, 4),
            level("full_snapshot", "ask", "101", "1", 10, 4),
        ],
    );
    let state = pipeline.instrument("BTC-TEST").unwrap();
    assert_eq!(state.book().status(), BookStatus::Live);
    assert_eq!(state.session_id(), 3);
}

#[test]
fn test_session_reset_expires_pending_records() {
    let mut config = Config::default();
    config.targets.horizons_secs = vec![60];
    let mut pipeline = Pipeline::new(config);

    let out = feed(
        &mut pipeline,
        &[
            level("full_snapshot", "bid", "100", "1", 1, 0),
            level("full_snapshot", "ask", "101", "1", 1, 0),
            level("incremental_update", "bid", "100", "2", 2, 25),
            level("full_snapshot", "bid", "100", "1", 3, 26),
        ],
    );

    // Boundaries 0, 10 and 20 were pending when the new snapshot arrived
    assert_eq!(out.len(), 3);
    assert!(out.iter().all(|r| r.target_status == TargetStatus::Expired));
    assert!(out.iter().all(|r| r.snapshot.session_id == 1));
}

#[test]
fn test_coinbase_envelope_end_to_end() {
    let mut pipeline = Pipeline::new(Config::default());
    let snapshot = r#"{"channel":"l2_data","timestamp":"2025-11-07T10:00:00Z","sequence_num":1,"events":[{"type":"snapshot","product_id":"BTC-USD","updates":[{"side":"bid","event_time":"2025-11-07T10:00:00Z","price_level":"100898.1","new_quantity":"0.5"},{"side":"offer","event_time":"2025-11-07T10:00:00Z","price_level":"100898.2","new_quantity":"0.25"}]}]}"#;
    let update = r#"{"channel":"l2_data","timestamp":"2025-11-07T10:00:12Z","sequence_num":2,"events":[{"type":"update","product_id":"BTC-USD","updates":[{"side":"bid","event_time":"2025-11-07T10:00:12Z","price_level":"100898.0","new_quantity":"1.5"}]}]}"#;
    let ticker = r#"{"channel":"ticker","timestamp":"2025-11-07T10:00:05Z","sequence_num":3,"events":[{"type":"update","tickers":[{"type":"ticker","product_id":"BTC-USD","price":"100898.15","volume_24_h":"9732.3"}]}]}"#;

    pipeline.process_line(snapshot);
    pipeline.process_line(ticker);
    pipeline.process_line(update);

    let stats = pipeline.stats();
    assert_eq!(stats.book_events, 2);
    assert_eq!(stats.ticker_events, 1);
    assert_eq!(stats.malformed, 0);

    let records = pipeline.finish();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].instrument_id(), "BTC-USD");
    assert!(records[0].ticker_price.is_none());
    assert_eq!(records[1].ticker_price, Some(dec!(100898.15)));
    assert_eq!(records[1].ticker_volume_24h, Some(dec!(9732.3)));
}
