//! Feature storage module
//!
//! Buffers feature records and writes them to date and instrument
//! partitioned Parquet files

mod parquet;
mod recorder;

pub use parquet::{feature_schema, partition_dir, ParquetReader, ParquetWriter, StoredFeature};
pub use recorder::{DataRecorder, RecorderStats};
