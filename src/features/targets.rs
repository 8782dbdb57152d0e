//! Forward targets and the pending-record buffer
//!
//! A record waits here until every horizon has seen a valid future snapshot.
//! Records only ever leave from the front, so output stays in sample-time
//! order even when a later record resolves first.

use super::FeatureRecord;
use crate::config::TargetConfig;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Finalisation state of a record's targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// Waiting for future snapshots
    Pending,
    /// Every horizon resolved
    Finalized,
    /// Left the buffer before every horizon resolved
    Expired,
    /// Invalid snapshot, never eligible for targets
    Excluded,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "pending",
            TargetStatus::Finalized => "finalized",
            TargetStatus::Expired => "expired",
            TargetStatus::Excluded => "excluded",
        }
    }
}

/// Direction label of a forward return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Label `ret`, treating `[-dead_zone, dead_zone]` as flat
    pub fn classify(ret: f64, dead_zone: f64) -> Self {
        if ret > dead_zone {
            Direction::Up
        } else if ret < -dead_zone {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

/// Resolved forward target for one horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetValue {
    pub horizon_secs: u64,
    /// Sample time of the snapshot that resolved the target
    pub future_time: DateTime<Utc>,
    pub future_price: Decimal,
    /// `(future − current) / current`
    pub return_pct: f64,
    pub direction: Direction,
}

/// Answer to a target query
#[derive(Debug, Clone, PartialEq)]
pub enum TargetState {
    /// `t + h` not yet observed
    Pending,
    Ready(TargetValue),
    /// Record unknown, already emitted, excluded or horizon not configured
    Unknown,
}

/// Bounded ring of records awaiting forward targets
#[derive(Debug)]
pub struct PendingTargets {
    horizons: Vec<u64>,
    dead_zone: f64,
    max_age: Duration,
    capacity: usize,
    records: VecDeque<FeatureRecord>,
}

impl PendingTargets {
    pub fn new(config: &TargetConfig, interval_secs: u64) -> Self {
        let max_age_secs = config.max_horizon_secs() + config.grace_secs;
        let capacity = (max_age_secs / interval_secs.max(1)) as usize + 2;
        Self {
            horizons: config.horizons_secs.clone(),
            dead_zone: config.dead_zone,
            max_age: Duration::seconds(max_age_secs as i64),
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn horizons(&self) -> &[u64] {
        &self.horizons
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolve horizons of earlier records against a valid snapshot at `time`
    ///
    /// Must be called before the snapshot's own record is pushed, and in
    /// sample-time order, so each horizon takes the first qualifying snapshot.
    pub fn observe(&mut self, time: DateTime<Utc>, price: Decimal) {
        for record in self.records.iter_mut() {
            if record.target_status != TargetStatus::Pending {
                continue;
            }
            let Some(base) = record.reference_price() else {
                continue;
            };

            for (slot, horizon) in record.targets.iter_mut().zip(&self.horizons) {
                if slot.is_some() {
                    continue;
                }
                if time < record.snapshot.sample_time + Duration::seconds(*horizon as i64) {
                    continue;
                }
                let Some(return_pct) = price
                    .checked_sub(base)
                    .and_then(|d| d.checked_div(base))
                    .and_then(|r| r.to_f64())
                else {
                    continue;
                };
                *slot = Some(TargetValue {
                    horizon_secs: *horizon,
                    future_time: time,
                    future_price: price,
                    return_pct,
                    direction: Direction::classify(return_pct, self.dead_zone),
                });
            }

            if record.targets.iter().all(Option::is_some) {
                record.target_status = TargetStatus::Finalized;
            }
        }
    }

    pub fn push(&mut self, record: FeatureRecord) {
        self.records.push_back(record);
    }

    /// Pop records that can leave the buffer as of `now`
    ///
    /// Finalized and excluded records leave once they reach the front. A
    /// pending front record is expired when `t + max_horizon + grace < now`
    /// or when the buffer is over capacity.
    pub fn drain(&mut self, now: DateTime<Utc>) -> Vec<FeatureRecord> {
        let mut out = Vec::new();
        while let Some(front) = self.records.front() {
            let settled = front.target_status != TargetStatus::Pending;
            let stale = front.snapshot.sample_time + self.max_age < now;
            let overflow = self.records.len() > self.capacity;
            if !(settled || stale || overflow) {
                break;
            }
            if let Some(record) = self.records.pop_front() {
                out.push(expire(record));
            }
        }
        out
    }

    /// Pop every record, expiring those still pending
    pub fn expire_all(&mut self) -> Vec<FeatureRecord> {
        self.records.drain(..).map(expire).collect()
    }

    /// Target of the buffered record sampled at `sample_time` for `horizon_secs`
    pub fn target_state(&self, sample_time: DateTime<Utc>, horizon_secs: u64) -> TargetState {
        let Some(index) = self.horizons.iter().position(|h| *h == horizon_secs) else {
            return TargetState::Unknown;
        };
        let Some(record) = self
            .records
            .iter()
            .find(|r| r.snapshot.sample_time == sample_time)
        else {
            return TargetState::Unknown;
        };

        match (record.targets.get(index), record.target_status) {
            (_, TargetStatus::Excluded) => TargetState::Unknown,
            (Some(Some(value)), _) => TargetState::Ready(value.clone()),
            (_, TargetStatus::Pending) => TargetState::Pending,
            _ => TargetState::Unknown,
        }
    }
}

/// A record leaving while still pending carries no targets at all, even
/// for horizons that had resolved
fn expire(mut record: FeatureRecord) -> FeatureRecord {
    if record.target_status == TargetStatus::Pending {
        record.target_status = TargetStatus::Expired;
        record.targets.iter_mut().for_each(|t| *t = None);
    }
    record
}
