//! Raw and canonical event types

use crate::orderbook::PriceLevel;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One level change as it appeared on the wire, unvalidated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLevel {
    pub side: String,
    pub price: String,
    pub quantity: String,
}

/// Book record as decoded from a feed line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBookRecord {
    pub instrument_id: String,
    /// "snapshot" / "full_snapshot" or "update" / "incremental_update"
    pub kind: String,
    pub sequence_num: u64,
    pub timestamp: String,
    pub levels: Vec<RawLevel>,
}

/// Ticker record as decoded from a feed line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTickerRecord {
    pub instrument_id: String,
    pub timestamp: String,
    pub last_trade_price: String,
    pub volume_24h: Option<String>,
}

/// Decoded feed record prior to validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawRecord {
    Book(RawBookRecord),
    Ticker(RawTickerRecord),
    /// Heartbeats, subscription acks and other channels without market data
    Control { channel: String },
}

impl RawRecord {
    /// Instrument the record belongs to, if any
    pub fn instrument_id(&self) -> Option<&str> {
        match self {
            RawRecord::Book(book) => Some(&book.instrument_id),
            RawRecord::Ticker(ticker) => Some(&ticker.instrument_id),
            RawRecord::Control { .. } => None,
        }
    }
}

/// Book event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookEventKind {
    FullSnapshot,
    IncrementalUpdate,
}

impl BookEventKind {
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "snapshot" | "full_snapshot" => Some(BookEventKind::FullSnapshot),
            "update" | "incremental_update" => Some(BookEventKind::IncrementalUpdate),
            _ => None,
        }
    }
}

/// Validated order book event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEvent {
    pub instrument_id: String,
    pub kind: BookEventKind,
    pub levels: Vec<PriceLevel>,
    pub sequence_num: u64,
    pub source_time: DateTime<Utc>,
    /// Malformed levels dropped from the original batch
    pub dropped_levels: u32,
}

impl BookEvent {
    pub fn snapshot(
        instrument_id: impl Into<String>,
        sequence_num: u64,
        source_time: DateTime<Utc>,
        levels: Vec<PriceLevel>,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            kind: BookEventKind::FullSnapshot,
            levels,
            sequence_num,
            source_time,
            dropped_levels: 0,
        }
    }

    pub fn update(
        instrument_id: impl Into<String>,
        sequence_num: u64,
        source_time: DateTime<Utc>,
        levels: Vec<PriceLevel>,
    ) -> Self {
        Self {
            kind: BookEventKind::IncrementalUpdate,
            ..Self::snapshot(instrument_id, sequence_num, source_time, levels)
        }
    }
}

/// Validated ticker update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub instrument_id: String,
    pub source_time: DateTime<Utc>,
    pub last_trade_price: Decimal,
    pub volume_24h: Option<Decimal>,
}

/// Canonical event consumed by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Book(BookEvent),
    Ticker(TickerUpdate),
}

impl Event {
    pub fn instrument_id(&self) -> &str {
        match self {
            Event::Book(event) => &event.instrument_id,
            Event::Ticker(ticker) => &ticker.instrument_id,
        }
    }

    pub fn source_time(&self) -> DateTime<Utc> {
        match self {
            Event::Book(event) => event.source_time,
            Event::Ticker(ticker) => ticker.source_time,
        }
    }
}

/// Reasons a feed record is dropped
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Unrecognized record shape")]
    UnrecognizedShape,
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Missing instrument identifier")]
    MissingInstrument,
    #[error("Unknown event kind: {0}")]
    UnknownKind(String),
    #[error("Unknown side: {0}")]
    UnknownSide(String),
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Price must be positive: {0}")]
    NonPositivePrice(Decimal),
    #[error("Quantity must be non-negative: {0}")]
    NegativeQuantity(Decimal),
    #[error("All {0} levels in batch are malformed")]
    EmptyBatch(u32),
}
