//! Normalizer module
//!
//! Decodes feed lines, validates raw records into canonical events and tracks
//! per-instrument session boundaries.

mod coinbase;
mod session;
mod types;

pub use coinbase::decode_line;
pub use session::{SessionReason, SessionSignal, SessionTracker};
pub use types::{
    BookEvent, BookEventKind, Event, NormalizeError, RawBookRecord, RawLevel, RawRecord,
    RawTickerRecord, TickerUpdate,
};

use crate::orderbook::{PriceLevel, Side};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Validates raw records into canonical events
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Turn a raw record into zero or one event
    ///
    /// Control records and empty incremental batches yield `Ok(None)`.
    /// Malformed levels inside a batch are dropped and counted on the event;
    /// a batch with no valid level left is an error.
    pub fn normalize(&self, raw: RawRecord) -> Result<Option<Event>, NormalizeError> {
        match raw {
            RawRecord::Book(record) => self.normalize_book(record),
            RawRecord::Ticker(record) => self.normalize_ticker(record).map(Some),
            RawRecord::Control { channel } => {
                tracing::trace!(channel = %channel, "Skipping control record");
                Ok(None)
            }
        }
    }

    fn normalize_book(&self, record: RawBookRecord) -> Result<Option<Event>, NormalizeError> {
        let instrument_id = instrument(record.instrument_id)?;
        let kind = BookEventKind::parse(&record.kind)
            .ok_or_else(|| NormalizeError::UnknownKind(record.kind.clone()))?;
        let source_time = parse_timestamp(&record.timestamp)?;

        if record.levels.is_empty() && kind == BookEventKind::IncrementalUpdate {
            return Ok(None);
        }

        let total = record.levels.len();
        let mut levels = Vec::with_capacity(total);
        let mut first_error = None;
        for raw in &record.levels {
            match parse_level(raw) {
                Ok(level) => levels.push(level),
                Err(e) => {
                    tracing::debug!(
                        instrument = %instrument_id,
                        error = %e,
                        "Dropping malformed level"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        let dropped_levels = (total - levels.len()) as u32;
        if total > 0 && levels.is_empty() {
            return Err(match first_error {
                Some(e) if total == 1 => e,
                _ => NormalizeError::EmptyBatch(dropped_levels),
            });
        }

        Ok(Some(Event::Book(BookEvent {
            instrument_id,
            kind,
            levels,
            sequence_num: record.sequence_num,
            source_time,
            dropped_levels,
        })))
    }

    fn normalize_ticker(&self, record: RawTickerRecord) -> Result<Event, NormalizeError> {
        let instrument_id = instrument(record.instrument_id)?;
        let source_time = parse_timestamp(&record.timestamp)?;
        let last_trade_price = parse_decimal(&record.last_trade_price)?;
        if last_trade_price <= Decimal::ZERO {
            return Err(NormalizeError::NonPositivePrice(last_trade_price));
        }
        let volume_24h = record
            .volume_24h
            .as_deref()
            .map(parse_decimal)
            .transpose()?;

        Ok(Event::Ticker(TickerUpdate {
            instrument_id,
            source_time,
            last_trade_price,
            volume_24h,
        }))
    }
}

fn instrument(id: String) -> Result<String, NormalizeError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::MissingInstrument);
    }
    Ok(if trimmed.len() == id.len() {
        id
    } else {
        trimmed.to_string()
    })
}

fn parse_level(raw: &RawLevel) -> Result<PriceLevel, NormalizeError> {
    let side = Side::parse(&raw.side).ok_or_else(|| NormalizeError::UnknownSide(raw.side.clone()))?;
    let price = parse_decimal(&raw.price)?;
    if price <= Decimal::ZERO {
        return Err(NormalizeError::NonPositivePrice(price));
    }
    let quantity = parse_decimal(&raw.quantity)?;
    if quantity < Decimal::ZERO {
        return Err(NormalizeError::NegativeQuantity(quantity));
    }
    Ok(PriceLevel::new(side, price, quantity))
}

/// Parse a decimal in plain or scientific notation
pub fn parse_decimal(text: &str) -> Result<Decimal, NormalizeError> {
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| NormalizeError::InvalidDecimal(text.to_string()))
}

/// Parse an RFC 3339 timestamp or integer epoch milliseconds
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let text = text.trim();
    let invalid = || NormalizeError::InvalidTimestamp(text.to_string());

    if !text.is_empty() && text.trim_start_matches('-').bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = text.parse().map_err(|_| invalid())?;
        return Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid);
    }

    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid())
}
