//! lob-pipeline: order book sampling and microstructure features
//!
//! This library provides the core components for:
//! - Normalizing flat and Coinbase-style L2 feed records
//! - Session tracking and order book reconstruction
//! - Adaptive outlier filtering of price levels
//! - Fixed-interval snapshot sampling
//! - Microstructure features and forward return targets
//! - Async per-instrument runtime and JSONL replay
//! - Partitioned Parquet output
//! - Structured logging and Prometheus metrics

pub mod cli;
pub mod config;
pub mod data;
pub mod features;
pub mod filter;
pub mod normalizer;
pub mod orderbook;
pub mod pipeline;
pub mod sampler;
pub mod source;
pub mod telemetry;
