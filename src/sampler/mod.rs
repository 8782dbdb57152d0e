//! Sampler module
//!
//! Fixed-cadence clock per instrument. Boundaries sit on multiples of the
//! interval since the Unix epoch, so every instrument samples on the same grid.

use chrono::{DateTime, Duration, Utc};

/// Per-instrument sampling cursor
#[derive(Debug, Clone)]
pub struct Sampler {
    interval: Duration,
    interval_secs: i64,
    /// Next boundary to emit; `None` until the session's book is live
    next: Option<DateTime<Utc>>,
    /// Longest jump past `next` that is sampled through
    max_gap: Option<Duration>,
}

impl Sampler {
    pub fn new(interval_secs: u64) -> Self {
        let interval_secs = interval_secs.max(1) as i64;
        Self {
            interval: Duration::seconds(interval_secs),
            interval_secs,
            next: None,
            max_gap: None,
        }
    }

    pub fn with_max_gap_secs(mut self, secs: u64) -> Self {
        self.max_gap = i64::try_from(secs).ok().and_then(Duration::try_seconds);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_started(&self) -> bool {
        self.next.is_some()
    }

    pub fn next_boundary(&self) -> Option<DateTime<Utc>> {
        self.next
    }

    /// Start the cursor at the first grid point at or after `time`
    ///
    /// No-op when already started.
    pub fn start(&mut self, time: DateTime<Utc>) {
        if self.next.is_none() {
            self.next = self.ceil_to_grid(time);
        }
    }

    /// Whether `time` lies further past the next boundary than the gap limit
    pub fn is_gap(&self, time: DateTime<Utc>) -> bool {
        match (self.next, self.max_gap) {
            (Some(next), Some(max_gap)) => time - next > max_gap,
            _ => false,
        }
    }

    /// Emit every unemitted boundary strictly before `time`
    ///
    /// Call before applying an event stamped `time`, so the state sampled at a
    /// boundary holds events up to and including it. Times that fall behind
    /// the cursor emit nothing. A jump beyond the gap limit emits nothing and
    /// restarts the grid at `time`.
    pub fn advance(&mut self, time: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        if self.is_gap(time) {
            self.restart(time);
            return Vec::new();
        }
        let Some(mut boundary) = self.next else {
            return Vec::new();
        };

        let mut due = Vec::new();
        while boundary < time {
            due.push(boundary);
            boundary += self.interval;
        }
        self.next = Some(boundary);
        due
    }

    /// Drop the cursor so boundaries across a session gap are never emitted
    pub fn reset(&mut self) {
        self.next = None;
    }

    /// Re-anchor the grid at the first boundary at or after `time`
    pub fn restart(&mut self, time: DateTime<Utc>) {
        self.next = self.ceil_to_grid(time);
    }

    fn ceil_to_grid(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = time.timestamp();
        let floor = secs.div_euclid(self.interval_secs) * self.interval_secs;
        let on_grid = floor == secs && time.timestamp_subsec_nanos() == 0;
        let boundary = if on_grid {
            floor
        } else {
            floor + self.interval_secs
        };
        DateTime::from_timestamp(boundary, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64, millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_762_509_600 + secs, 0).unwrap() + Duration::milliseconds(millis)
    }

    #[test]
    fn test_not_started_emits_nothing() {
        let mut sampler = Sampler::new(10);
        assert!(!sampler.is_started());
        assert!(sampler.advance(at(100, 0)).is_empty());
    }

    #[test]
    fn test_start_rounds_up_to_grid() {
        let mut sampler = Sampler::new(10);
        sampler.start(at(3, 500));
        assert_eq!(sampler.next_boundary(), Some(at(10, 0)));

        let mut sampler = Sampler::new(10);
        sampler.start(at(20, 0));
        assert_eq!(sampler.next_boundary(), Some(at(20, 0)));
    }

    #[test]
    fn test_advance_emits_boundaries_before_time() {
        let mut sampler = Sampler::new(10);
        sampler.start(at(1, 0));

        assert!(sampler.advance(at(5, 0)).is_empty());
        // Boundary at exactly t is not emitted until a later event
        assert!(sampler.advance(at(10, 0)).is_empty());
        assert_eq!(sampler.advance(at(10, 1)), vec![at(10, 0)]);
        assert_eq!(
            sampler.advance(at(45, 0)),
            vec![at(20, 0), at(30, 0), at(40, 0)]
        );
        assert_eq!(sampler.next_boundary(), Some(at(50, 0)));
    }

    #[test]
    fn test_out_of_order_time_never_reopens() {
        let mut sampler = Sampler::new(10);
        sampler.start(at(0, 0));
        assert_eq!(sampler.advance(at(25, 0)), vec![at(0, 0), at(10, 0), at(20, 0)]);
        assert!(sampler.advance(at(12, 0)).is_empty());
        assert_eq!(sampler.advance(at(31, 0)), vec![at(30, 0)]);
    }

    #[test]
    fn test_reset_skips_gap() {
        let mut sampler = Sampler::new(10);
        sampler.start(at(0, 0));
        sampler.advance(at(15, 0));
        sampler.reset();
        assert!(sampler.advance(at(500, 0)).is_empty());

        sampler.start(at(500, 0));
        assert_eq!(sampler.advance(at(512, 0)), vec![at(500, 0), at(510, 0)]);
    }

    #[test]
    fn test_jump_beyond_max_gap_restarts_grid() {
        let mut sampler = Sampler::new(10).with_max_gap_secs(60);
        sampler.start(at(0, 0));
        assert_eq!(sampler.advance(at(55, 0)).len(), 6);

        // A year ahead emits nothing and picks up from there
        let far = at(365 * 86_400, 500);
        assert!(sampler.is_gap(far));
        assert!(sampler.advance(far).is_empty());
        assert_eq!(sampler.next_boundary(), Some(at(365 * 86_400 + 10, 0)));
        assert!(!sampler.is_gap(at(365 * 86_400 + 20, 0)));
    }

    #[test]
    fn test_without_max_gap_every_boundary_is_emitted() {
        let mut sampler = Sampler::new(10);
        sampler.start(at(0, 0));
        assert!(!sampler.is_gap(at(86_400, 0)));
        assert_eq!(sampler.advance(at(86_400, 0)).len(), 8_640);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut sampler = Sampler::new(10);
        sampler.start(at(1, 0));
        sampler.start(at(99, 0));
        assert_eq!(sampler.next_boundary(), Some(at(10, 0)));
    }
}
