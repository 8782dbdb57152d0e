//! Partitioned Parquet storage for feature records
//!
//! Files land under `<output_dir>/date=YYYY-MM-DD/instrument_id=<id>/`.
//! Decimal prices are stored as strings to keep their precision, derived
//! features as nullable Float64 and timestamps as UTC microseconds.

use crate::features::{FeatureLayout, FeatureRecord, MarketImpact, TargetValue};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, StringArray, TimestampMicrosecondArray,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Column name fragment for a depth band: 0.1 -> "0_1pct"
fn band_tag(band: &Decimal) -> String {
    format!("{}pct", band.normalize()).replace(['.', '-'], "_")
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

fn decimal_text(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Fields and arrays assembled side by side so the schema can never drift
/// from the data
#[derive(Default)]
struct Columns {
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
}

impl Columns {
    fn push(&mut self, field: Field, array: ArrayRef) {
        self.fields.push(field);
        self.arrays.push(array);
    }

    fn utf8(&mut self, name: impl Into<String>, nullable: bool, values: Vec<Option<String>>) {
        self.push(
            Field::new(name, DataType::Utf8, nullable),
            Arc::new(StringArray::from(values)),
        );
    }

    fn float(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        self.push(
            Field::new(name, DataType::Float64, true),
            Arc::new(Float64Array::from(
                values.into_iter().map(finite).collect::<Vec<_>>(),
            )),
        );
    }

    fn boolean(&mut self, name: impl Into<String>, nullable: bool, values: Vec<Option<bool>>) {
        self.push(
            Field::new(name, DataType::Boolean, nullable),
            Arc::new(BooleanArray::from(values)),
        );
    }

    fn timestamp(&mut self, name: impl Into<String>, nullable: bool, values: Vec<Option<i64>>) {
        self.push(
            Field::new(name, timestamp_type(), nullable),
            Arc::new(TimestampMicrosecondArray::from(values).with_timezone("UTC")),
        );
    }

    fn uint64(&mut self, name: impl Into<String>, values: Vec<u64>) {
        self.push(
            Field::new(name, DataType::UInt64, false),
            Arc::new(UInt64Array::from(values)),
        );
    }

    fn uint32(&mut self, name: impl Into<String>, values: Vec<u32>) {
        self.push(
            Field::new(name, DataType::UInt32, false),
            Arc::new(UInt32Array::from(values)),
        );
    }
}

fn strings(
    records: &[FeatureRecord],
    f: impl Fn(&FeatureRecord) -> Option<String>,
) -> Vec<Option<String>> {
    records.iter().map(f).collect()
}

fn floats(records: &[FeatureRecord], f: impl Fn(&FeatureRecord) -> Option<f64>) -> Vec<Option<f64>> {
    records.iter().map(f).collect()
}

fn target_at(record: &FeatureRecord, i: usize) -> Option<&TargetValue> {
    record.targets.get(i).and_then(|t| t.as_ref())
}

/// Build every column for `records` in schema order
fn build_columns(layout: &FeatureLayout, records: &[FeatureRecord]) -> Columns {
    let mut c = Columns::default();

    // Snapshot
    c.timestamp(
        "sample_time",
        false,
        records
            .iter()
            .map(|r| Some(r.snapshot.sample_time.timestamp_micros()))
            .collect(),
    );
    c.utf8("instrument_id", false, strings(records, |r| Some(r.snapshot.instrument_id.clone())));
    c.uint64("session_id", records.iter().map(|r| r.snapshot.session_id).collect());
    c.uint64(
        "last_sequence_num",
        records.iter().map(|r| r.snapshot.last_sequence_num).collect(),
    );
    c.utf8("best_bid", true, strings(records, |r| decimal_text(r.snapshot.best_bid)));
    c.utf8("best_ask", true, strings(records, |r| decimal_text(r.snapshot.best_ask)));
    c.utf8("best_bid_size", true, strings(records, |r| decimal_text(r.snapshot.best_bid_size)));
    c.utf8("best_ask_size", true, strings(records, |r| decimal_text(r.snapshot.best_ask_size)));
    c.utf8("microprice", true, strings(records, |r| decimal_text(r.snapshot.microprice)));
    c.boolean(
        "is_crossed",
        false,
        records.iter().map(|r| Some(r.snapshot.is_crossed)).collect(),
    );
    c.uint32(
        "outlier_filtered_count",
        records.iter().map(|r| r.snapshot.outlier_filtered_count).collect(),
    );
    c.utf8(
        "bid_depth_total",
        false,
        strings(records, |r| Some(r.snapshot.bid_depth_total.to_string())),
    );
    c.utf8(
        "ask_depth_total",
        false,
        strings(records, |r| Some(r.snapshot.ask_depth_total.to_string())),
    );

    for i in 0..layout.top_levels {
        c.utf8(
            format!("bid_price_{i}"),
            true,
            strings(records, |r| r.snapshot.bids.get(i).map(|(p, _)| p.to_string())),
        );
        c.utf8(
            format!("bid_size_{i}"),
            true,
            strings(records, |r| r.snapshot.bids.get(i).map(|(_, q)| q.to_string())),
        );
        c.utf8(
            format!("ask_price_{i}"),
            true,
            strings(records, |r| r.snapshot.asks.get(i).map(|(p, _)| p.to_string())),
        );
        c.utf8(
            format!("ask_size_{i}"),
            true,
            strings(records, |r| r.snapshot.asks.get(i).map(|(_, q)| q.to_string())),
        );
    }

    for (i, band) in layout.depth_bands_pct.iter().enumerate() {
        let tag = band_tag(band);
        c.utf8(
            format!("bid_depth_{tag}"),
            true,
            strings(records, |r| r.snapshot.bid_depth_by_band.get(i).map(|d| d.to_string())),
        );
        c.utf8(
            format!("ask_depth_{tag}"),
            true,
            strings(records, |r| r.snapshot.ask_depth_by_band.get(i).map(|d| d.to_string())),
        );
        c.float(
            format!("depth_imbalance_{tag}"),
            floats(records, |r| r.band_imbalance.get(i).copied().flatten()),
        );
    }

    // Basic
    c.utf8("mid_price", true, strings(records, |r| decimal_text(r.mid_price)));
    c.utf8("spread", true, strings(records, |r| decimal_text(r.spread)));
    c.float("spread_bps", floats(records, |r| r.spread_bps));
    c.float("size_imbalance", floats(records, |r| r.size_imbalance));
    c.float("effective_spread", floats(records, |r| r.effective_spread));

    // Ticker
    c.timestamp(
        "ticker_time",
        true,
        records
            .iter()
            .map(|r| r.ticker_time.map(|t| t.timestamp_micros()))
            .collect(),
    );
    c.utf8("ticker_price", true, strings(records, |r| decimal_text(r.ticker_price)));
    c.utf8("ticker_volume_24h", true, strings(records, |r| decimal_text(r.ticker_volume_24h)));
    c.float("ticker_basis_bps", floats(records, |r| r.ticker_basis_bps));

    // Returns and volatility
    for (i, h) in layout.return_horizons_secs.iter().enumerate() {
        c.float(
            format!("return_{h}s"),
            floats(records, |r| r.returns.get(i).and_then(|x| x.simple)),
        );
        c.float(
            format!("log_return_{h}s"),
            floats(records, |r| r.returns.get(i).and_then(|x| x.log)),
        );
    }
    for (i, w) in layout.volatility_windows_secs.iter().enumerate() {
        c.float(
            format!("volatility_{w}s"),
            floats(records, |r| r.volatility.get(i).and_then(|x| x.realized)),
        );
        c.float(
            format!("parkinson_{w}s"),
            floats(records, |r| r.volatility.get(i).and_then(|x| x.parkinson)),
        );
    }

    // Order flow
    c.float("order_flow_imbalance", floats(records, |r| r.order_flow_imbalance));
    for (i, w) in layout.imbalance_windows.iter().enumerate() {
        c.float(
            format!("imbalance_ma_{w}"),
            floats(records, |r| r.imbalance_ma.get(i).copied().flatten()),
        );
    }
    c.float("vpin", floats(records, |r| r.vpin));
    c.float("vpin_trend", floats(records, |r| r.vpin_trend));
    c.float("roll_spread", floats(records, |r| r.roll_spread));

    let impacts: [(&str, fn(&FeatureRecord) -> Option<&MarketImpact>); 2] = [
        ("buy", |r| r.buy_impact.as_ref()),
        ("sell", |r| r.sell_impact.as_ref()),
    ];
    for (prefix, pick) in impacts {
        c.utf8(
            format!("{prefix}_impact_vwap"),
            true,
            strings(records, |r| pick(r).map(|i| i.vwap.to_string())),
        );
        c.float(
            format!("{prefix}_impact_bps"),
            floats(records, |r| pick(r).map(|i| i.slippage_bps)),
        );
        c.boolean(
            format!("{prefix}_impact_filled"),
            true,
            records.iter().map(|r| pick(r).map(|i| i.filled)).collect(),
        );
    }

    // Technical
    let technical: [(&str, fn(&FeatureRecord) -> Option<f64>); 20] = [
        ("sma_5", |r| r.technical.sma_5),
        ("sma_10", |r| r.technical.sma_10),
        ("sma_20", |r| r.technical.sma_20),
        ("sma_50", |r| r.technical.sma_50),
        ("ema_9", |r| r.technical.ema_9),
        ("ema_fast", |r| r.technical.ema_fast),
        ("ema_21", |r| r.technical.ema_21),
        ("ema_slow", |r| r.technical.ema_slow),
        ("macd", |r| r.technical.macd),
        ("macd_signal", |r| r.technical.macd_signal),
        ("macd_histogram", |r| r.technical.macd_histogram),
        ("rsi", |r| r.technical.rsi),
        ("rsi_7", |r| r.technical.rsi_7),
        ("bollinger_position", |r| r.technical.bollinger_position),
        ("bollinger_width", |r| r.technical.bollinger_width),
        ("distance_from_sma_20", |r| r.technical.distance_from_sma_20),
        ("distance_from_ema_21", |r| r.technical.distance_from_ema_21),
        ("stochastic", |r| r.technical.stochastic),
        ("atr", |r| r.technical.atr),
        ("atr_normalized", |r| r.technical.atr_normalized),
    ];
    for (name, pick) in technical {
        c.float(name, floats(records, pick));
    }
    let flags: [(&str, fn(&FeatureRecord) -> Option<bool>); 4] = [
        ("price_above_sma_20", |r| r.technical.price_above_sma_20),
        ("price_above_sma_50", |r| r.technical.price_above_sma_50),
        ("sma_crossover_5_20", |r| r.technical.sma_crossover_5_20),
        ("ema_crossover_9_21", |r| r.technical.ema_crossover_9_21),
    ];
    for (name, pick) in flags {
        c.boolean(name, true, records.iter().map(pick).collect());
    }

    // Targets
    c.utf8(
        "target_status",
        false,
        strings(records, |r| Some(r.target_status.as_str().to_string())),
    );
    for (i, h) in layout.target_horizons_secs.iter().enumerate() {
        c.float(
            format!("target_return_{h}s"),
            floats(records, |r| target_at(r, i).map(|t| t.return_pct)),
        );
        c.utf8(
            format!("target_direction_{h}s"),
            true,
            strings(records, |r| target_at(r, i).map(|t| t.direction.as_str().to_string())),
        );
        c.utf8(
            format!("target_price_{h}s"),
            true,
            strings(records, |r| target_at(r, i).map(|t| t.future_price.to_string())),
        );
    }

    c
}

/// Schema of the feature files for `layout`
pub fn feature_schema(layout: &FeatureLayout) -> Schema {
    Schema::new(build_columns(layout, &[]).fields)
}

/// Directory holding one `(date, instrument)` partition
pub fn partition_dir(output_dir: &Path, date: NaiveDate, instrument_id: &str) -> PathBuf {
    let instrument = instrument_id.replace(['/', '\\'], "-");
    output_dir
        .join(format!("date={}", date.format("%Y-%m-%d")))
        .join(format!("instrument_id={instrument}"))
}

/// Parquet writer for feature records
pub struct ParquetWriter {
    output_dir: PathBuf,
    layout: FeatureLayout,
    schema: Arc<Schema>,
    files_written: u64,
}

impl ParquetWriter {
    /// Create a new Parquet writer
    pub fn new(output_dir: PathBuf, layout: FeatureLayout) -> Self {
        let schema = Arc::new(feature_schema(&layout));
        Self {
            output_dir,
            layout,
            schema,
            files_written: 0,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.schema.clone()
    }

    pub fn files_written(&self) -> u64 {
        self.files_written
    }

    /// File path for a partition flushed at `timestamp`
    pub fn file_path(&self, date: NaiveDate, instrument_id: &str, timestamp: DateTime<Utc>) -> PathBuf {
        let filename = format!(
            "features_{}_{:04}.parquet",
            timestamp.format("%Y%m%d_%H%M%S"),
            self.files_written
        );
        partition_dir(&self.output_dir, date, instrument_id).join(filename)
    }

    /// Write records into their `(date, instrument)` partitions
    ///
    /// One file per partition touched. Returns the paths written.
    pub fn write_partitioned(
        &mut self,
        records: &[FeatureRecord],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let mut partitions: BTreeMap<(NaiveDate, &str), Vec<FeatureRecord>> = BTreeMap::new();
        for record in records {
            partitions
                .entry((record.sample_time().date_naive(), record.instrument_id()))
                .or_default()
                .push(record.clone());
        }

        let mut paths = Vec::with_capacity(partitions.len());
        for ((date, instrument_id), group) in partitions {
            let path = self.file_path(date, instrument_id, now);
            self.write_file(&path, &group)?;
            self.files_written += 1;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Write records to a single Parquet file
    pub fn write_file(&self, path: &Path, records: &[FeatureRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, self.schema.clone(), Some(props))?;

        let columns = build_columns(&self.layout, records);
        let batch = RecordBatch::try_new(self.schema.clone(), columns.arrays)?;

        writer.write(&batch)?;
        writer.close()?;

        tracing::debug!(path = ?path, count = records.len(), "Wrote feature records to Parquet");
        Ok(())
    }
}

/// Key columns of a stored feature row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFeature {
    pub sample_time: DateTime<Utc>,
    pub instrument_id: String,
    pub session_id: u64,
    pub microprice: Option<Decimal>,
    pub mid_price: Option<Decimal>,
    pub order_flow_imbalance: Option<f64>,
    pub target_status: String,
}

/// Reader for feature Parquet files
pub struct ParquetReader {
    path: PathBuf,
}

impl ParquetReader {
    /// Create a new reader for a Parquet file
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every `.parquet` file below `dir`, sorted
    pub fn discover(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "parquet") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read raw record batches
    pub fn read_batches(&self) -> anyhow::Result<Vec<RecordBatch>> {
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        reader
            .map(|batch| batch.map_err(anyhow::Error::from))
            .collect()
    }

    /// Read the key columns of every row
    pub fn read_features(&self) -> anyhow::Result<Vec<StoredFeature>> {
        let mut rows = Vec::new();

        for batch in self.read_batches()? {
            let times = column::<TimestampMicrosecondArray>(&batch, "sample_time")?;
            let instruments = column::<StringArray>(&batch, "instrument_id")?;
            let sessions = column::<UInt64Array>(&batch, "session_id")?;
            let microprices = column::<StringArray>(&batch, "microprice")?;
            let mids = column::<StringArray>(&batch, "mid_price")?;
            let ofi = column::<Float64Array>(&batch, "order_flow_imbalance")?;
            let statuses = column::<StringArray>(&batch, "target_status")?;

            for i in 0..batch.num_rows() {
                let sample_time = DateTime::from_timestamp_micros(times.value(i))
                    .ok_or_else(|| anyhow::anyhow!("Invalid sample_time"))?;
                rows.push(StoredFeature {
                    sample_time,
                    instrument_id: instruments.value(i).to_string(),
                    session_id: sessions.value(i),
                    microprice: optional_decimal(microprices, i)?,
                    mid_price: optional_decimal(mids, i)?,
                    order_flow_imbalance: (!ofi.is_null(i)).then(|| ofi.value(i)),
                    target_status: statuses.value(i).to_string(),
                });
            }
        }

        Ok(rows)
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
}

fn optional_decimal(array: &StringArray, i: usize) -> anyhow::Result<Option<Decimal>> {
    if array.is_null(i) {
        return Ok(None);
    }
    Ok(Some(Decimal::from_str(array.value(i))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::features::{FeatureEngine, TargetStatus};
    use crate::orderbook::Snapshot;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_762_509_600 + secs, 0).unwrap()
    }

    fn snapshot(instrument: &str, secs: i64) -> Snapshot {
        Snapshot {
            instrument_id: instrument.to_string(),
            session_id: 1,
            sample_time: t(secs),
            best_bid: Some(dec!(100)),
            best_ask: Some(dec!(101)),
            best_bid_size: Some(dec!(2)),
            best_ask_size: Some(dec!(1)),
            bids: vec![(dec!(100), dec!(2))],
            asks: vec![(dec!(101), dec!(1))],
            bid_depth_by_band: vec![dec!(0), dec!(2)],
            ask_depth_by_band: vec![dec!(0), dec!(1)],
            bid_depth_total: dec!(2),
            ask_depth_total: dec!(1),
            microprice: Some(dec!(100.6)),
            is_crossed: false,
            outlier_filtered_count: 0,
            last_sequence_num: 9,
        }
    }

    fn records(instrument: &str) -> Vec<FeatureRecord> {
        let mut engine = FeatureEngine::new(&Config::default());
        for i in 0..3 {
            engine.on_snapshot(snapshot(instrument, i * 10), None);
        }
        engine.flush()
    }

    #[test]
    fn test_feature_schema_follows_layout() {
        let layout = FeatureLayout::from_config(&Config::default());
        let schema = feature_schema(&layout);

        assert_eq!(schema.field(0).name(), "sample_time");
        assert!(schema.field_with_name("bid_price_9").is_ok());
        assert!(schema.field_with_name("bid_depth_0_1pct").is_ok());
        assert!(schema.field_with_name("depth_imbalance_0_5pct").is_ok());
        assert!(schema.field_with_name("return_300s").is_ok());
        assert!(schema.field_with_name("parkinson_60s").is_ok());
        assert!(schema.field_with_name("imbalance_ma_30").is_ok());
        assert!(schema.field_with_name("target_direction_60s").is_ok());
        assert!(schema.field_with_name("buy_impact_filled").is_ok());
        assert!(schema.field_with_name("sma_50").is_ok());
        assert!(schema.field_with_name("atr_normalized").is_ok());
        assert_eq!(
            schema.field_with_name("ema_crossover_9_21").unwrap().data_type(),
            &DataType::Boolean
        );
        assert!(schema.field_with_name("bid_price_10").is_err());
    }

    #[test]
    fn test_partition_dir() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 7).unwrap();
        let dir = partition_dir(Path::new("/data"), date, "BTC-USD");
        assert_eq!(
            dir,
            PathBuf::from("/data/date=2025-11-07/instrument_id=BTC-USD")
        );
    }

    #[test]
    fn test_write_and_read_partitioned() {
        let temp_dir = TempDir::new().unwrap();
        let layout = FeatureLayout::from_config(&Config::default());
        let mut writer = ParquetWriter::new(temp_dir.path().to_path_buf(), layout);

        let mut all = records("BTC-USD");
        all.extend(records("ETH-USD"));
        let paths = writer.write_partitioned(&all, t(100)).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(writer.files_written(), 2);
        assert!(paths[0]
            .to_string_lossy()
            .contains("date=2025-11-07/instrument_id=BTC-USD/features_"));

        let rows = ParquetReader::new(paths[0].clone()).read_features().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].instrument_id, "BTC-USD");
        assert_eq!(rows[0].sample_time, t(0));
        assert_eq!(rows[0].microprice, Some(dec!(100.6)));
        assert_eq!(rows[0].mid_price, Some(dec!(100.5)));
        assert_eq!(rows[0].target_status, TargetStatus::Expired.as_str());
        assert!((rows[0].order_flow_imbalance.unwrap() - 1.0 / 3.0).abs() < 1e-12);

        let found = ParquetReader::discover(temp_dir.path()).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_write_empty_records() {
        let temp_dir = TempDir::new().unwrap();
        let layout = FeatureLayout::from_config(&Config::default());
        let mut writer = ParquetWriter::new(temp_dir.path().to_path_buf(), layout);
        let paths = writer.write_partitioned(&[], t(0)).unwrap();
        assert!(paths.is_empty());
        assert!(ParquetReader::discover(temp_dir.path()).unwrap().is_empty());
    }
}
