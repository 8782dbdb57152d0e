//! Feed line decoding
//!
//! Two shapes are accepted: the Coinbase Advanced Trade websocket envelope
//! (`{channel, timestamp, sequence_num, events: [...]}`) and flat per-level /
//! per-ticker records. Scalars may arrive as JSON strings or numbers.

use super::{NormalizeError, RawBookRecord, RawLevel, RawRecord, RawTickerRecord};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Coinbase websocket envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    channel: String,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    sequence_num: Value,
    #[serde(default)]
    events: Vec<EnvelopeEvent>,
}

/// One product event inside an envelope
#[derive(Debug, Deserialize)]
struct EnvelopeEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    updates: Vec<L2Update>,
    #[serde(default)]
    tickers: Vec<TickerEntry>,
}

/// `l2_data` level change
#[derive(Debug, Deserialize)]
struct L2Update {
    #[serde(default)]
    side: Value,
    #[serde(default)]
    price_level: Value,
    #[serde(default)]
    new_quantity: Value,
}

/// `ticker` channel entry
#[derive(Debug, Deserialize)]
struct TickerEntry {
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    volume_24_h: Value,
}

/// Decode one feed line into zero or more raw records
///
/// An envelope is flattened into one record per product event (one per
/// ticker entry on the `ticker` channel). Envelopes on channels without
/// market data yield a single `RawRecord::Control`.
pub fn decode_line(line: &str) -> Result<Vec<RawRecord>, NormalizeError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| NormalizeError::InvalidJson(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(NormalizeError::UnrecognizedShape);
    };

    if fields.contains_key("channel") {
        let envelope: Envelope = serde_json::from_value(Value::Object(fields))
            .map_err(|e| NormalizeError::InvalidJson(e.to_string()))?;
        decode_envelope(envelope)
    } else if fields.contains_key("kind") {
        decode_flat_level(&fields).map(|record| vec![record])
    } else if fields.contains_key("last_trade_price") {
        decode_flat_ticker(&fields).map(|record| vec![record])
    } else {
        Err(NormalizeError::UnrecognizedShape)
    }
}

fn decode_envelope(envelope: Envelope) -> Result<Vec<RawRecord>, NormalizeError> {
    let timestamp = scalar(&envelope.timestamp);

    match envelope.channel.as_str() {
        "l2_data" | "level2" => {
            let sequence_num = sequence(&envelope.sequence_num)?;
            Ok(envelope
                .events
                .into_iter()
                .map(|event| {
                    RawRecord::Book(RawBookRecord {
                        instrument_id: event.product_id,
                        kind: event.kind,
                        sequence_num,
                        timestamp: timestamp.clone(),
                        levels: event
                            .updates
                            .iter()
                            .map(|update| RawLevel {
                                side: scalar(&update.side),
                                price: scalar(&update.price_level),
                                quantity: scalar(&update.new_quantity),
                            })
                            .collect(),
                    })
                })
                .collect())
        }
        "ticker" | "ticker_batch" => Ok(envelope
            .events
            .into_iter()
            .flat_map(|event| event.tickers)
            .map(|ticker| {
                RawRecord::Ticker(RawTickerRecord {
                    instrument_id: ticker.product_id,
                    timestamp: timestamp.clone(),
                    last_trade_price: scalar(&ticker.price),
                    volume_24h: optional_scalar(&ticker.volume_24_h),
                })
            })
            .collect()),
        channel => Ok(vec![RawRecord::Control {
            channel: channel.to_string(),
        }]),
    }
}

fn decode_flat_level(fields: &Map<String, Value>) -> Result<RawRecord, NormalizeError> {
    let field = |name: &str| fields.get(name).map(scalar).unwrap_or_default();

    let sequence_num = match fields.get("sequence_num") {
        Some(value) => sequence(value)?,
        None => return Err(NormalizeError::MissingField("sequence_num")),
    };

    Ok(RawRecord::Book(RawBookRecord {
        instrument_id: field("instrument_id"),
        kind: field("kind"),
        sequence_num,
        timestamp: field("timestamp"),
        levels: vec![RawLevel {
            side: field("side"),
            price: field("price"),
            quantity: field("quantity"),
        }],
    }))
}

fn decode_flat_ticker(fields: &Map<String, Value>) -> Result<RawRecord, NormalizeError> {
    let field = |name: &str| fields.get(name).map(scalar).unwrap_or_default();

    Ok(RawRecord::Ticker(RawTickerRecord {
        instrument_id: field("instrument_id"),
        timestamp: field("timestamp"),
        last_trade_price: field("last_trade_price"),
        volume_24h: fields.get("volume_24h").and_then(optional_scalar),
    }))
}

/// Render a JSON scalar as text; null and containers become empty
fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn optional_scalar(value: &Value) -> Option<String> {
    Some(scalar(value)).filter(|s| !s.is_empty())
}

fn sequence(value: &Value) -> Result<u64, NormalizeError> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or(NormalizeError::MissingField("sequence_num")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| NormalizeError::MissingField("sequence_num")),
        _ => Err(NormalizeError::MissingField("sequence_num")),
    }
}
