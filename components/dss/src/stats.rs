//! Per-stream uptime/warmup statistics state machine.

use std::{collections::VecDeque, sync::Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum number of warmup samples retained for the running mean.
const MAX_WARMUP_SAMPLES: usize = 10;

/// Lifecycle status of the timed half of a stream's [`Stats`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusTiming {
    /// No process has been started yet, or the last one was cleanly
    /// stopped and accounted for.
    Stopped,
    /// A process was just spawned; waiting for `publish_start`.
    Started,
    /// `publish_start` was observed; the stream is actively publishing.
    On,
    /// The process died while it was supposed to be running.
    Died,
}

/// A monotonic total/measure counter, e.g. thumbnail attempts vs. errors.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CountStats {
    total: u64,
    errors: u64,
}

impl CountStats {
    /// Records one attempt, optionally failing.
    pub fn inc(&mut self, error: bool) {
        self.total += 1;
        if error {
            self.errors += 1;
        }
    }

    /// Ratio of successes over attempts; `0.0` when nothing was attempted.
    #[must_use]
    pub fn result(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.errors) as f64 / self.total as f64
        }
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors
    }
}

/// Uptime/downtime/warmup tracker for a single stream's transcoder.
#[derive(Debug)]
pub struct TimedStats {
    status: StatusTiming,
    measure: f64,
    total: f64,
    death_count: u64,
    warmup_samples: VecDeque<f64>,
    last_start: Option<DateTime<Utc>>,
    last_shutdown: Option<DateTime<Utc>>,
}

impl Default for TimedStats {
    fn default() -> Self {
        Self {
            status: StatusTiming::Stopped,
            measure: 0.0,
            total: 0.0,
            death_count: 0,
            warmup_samples: VecDeque::with_capacity(MAX_WARMUP_SAMPLES),
            last_start: None,
            last_shutdown: None,
        }
    }
}

impl TimedStats {
    /// Records a process spawn at `now`.
    pub fn started(&mut self) {
        self.started_at(Utc::now());
    }

    /// As [`TimedStats::started`], but with an explicit timestamp (used by
    /// tests).
    pub fn started_at(&mut self, now: DateTime<Utc>) {
        if self.status == StatusTiming::Stopped {
            self.status = StatusTiming::Started;
        }
        self.last_start = Some(now);
    }

    /// Records `publish_start`: the process has finished warming up.
    pub fn warmup(&mut self) {
        self.warmup_at(Utc::now());
    }

    /// As [`TimedStats::warmup`], but with an explicit timestamp.
    pub fn warmup_at(&mut self, now: DateTime<Utc>) {
        let elapsed = self
            .last_start
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        // `last_start` now marks publication start, not process start.
        self.last_start = Some(now);

        if self.warmup_samples.len() == MAX_WARMUP_SAMPLES {
            self.warmup_samples.pop_front();
        }
        self.warmup_samples.push_back(elapsed);
        self.total += elapsed; // warmup counts as downtime

        if self.status == StatusTiming::Died {
            self.downtime_at(now);
        }
        self.status = StatusTiming::On;
    }

    /// Records `publish_stop`: accumulates uptime since the last warmup.
    pub fn uptime(&mut self) {
        self.uptime_at(Utc::now());
    }

    /// As [`TimedStats::uptime`], but with an explicit timestamp.
    pub fn uptime_at(&mut self, now: DateTime<Utc>) {
        let elapsed = self
            .last_start
            .map(|start| (now - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        if self.status == StatusTiming::On {
            self.measure += elapsed;
        }
        self.total += elapsed;
        self.status = StatusTiming::Stopped;
    }

    fn downtime_at(&mut self, now: DateTime<Utc>) {
        let elapsed = self
            .last_shutdown
            .map(|shutdown| (now - shutdown).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        self.last_shutdown = None;
        self.total += elapsed;
    }

    /// Records that the process died unexpectedly while it should have
    /// been running.
    pub fn died(&mut self) {
        self.died_at(Utc::now());
    }

    /// As [`TimedStats::died`], but with an explicit timestamp.
    pub fn died_at(&mut self, now: DateTime<Utc>) {
        self.death_count += 1;
        if self.last_shutdown.is_none() {
            // Otherwise the stream is crashing non-stop; keep the original
            // time so uptime accounting stays correct.
            self.last_shutdown = Some(now);
        }
        self.status = StatusTiming::Died;
    }

    /// Mean of the last (at most 10) warmup samples, in seconds.
    #[must_use]
    pub fn warmup_mean(&self) -> f64 {
        if self.warmup_samples.is_empty() {
            0.0
        } else {
            self.warmup_samples.iter().sum::<f64>()
                / self.warmup_samples.len() as f64
        }
    }

    fn current_uptime(&self) -> f64 {
        if self.status == StatusTiming::On {
            self.last_start
                .map(|s| (Utc::now() - s).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0)
        } else {
            0.0
        }
    }

    fn current_downtime(&self) -> f64 {
        if self.status == StatusTiming::Died {
            self.last_shutdown
                .map(|s| (Utc::now() - s).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0)
        } else {
            0.0
        }
    }

    /// Total measured uptime including the current running interval.
    #[must_use]
    pub fn measure(&self) -> f64 {
        self.measure + self.current_uptime()
    }

    /// Total elapsed time (up + down + warmup) including current interval.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.total + self.current_uptime() + self.current_downtime()
    }

    /// Ratio of `measure / total`, `0.0` when `total == 0`.
    #[must_use]
    pub fn result(&self) -> f64 {
        let total = self.total();
        if total == 0.0 {
            0.0
        } else {
            self.measure() / total
        }
    }

    /// Number of times the process has died unexpectedly.
    #[must_use]
    pub fn death_count(&self) -> u64 {
        self.death_count
    }
}

/// Combined per-stream statistics, guarded by a single mutex so reads and
/// writes never observe a torn state.
#[derive(Debug, Default)]
pub struct Stats(Mutex<StatsInner>);

#[derive(Debug, Default)]
struct StatsInner {
    thumbnail: CountStats,
    timed: TimedStats,
}

/// JSON-shaped snapshot returned by the `/stats` HTTP routes.
#[derive(Debug, Serialize)]
pub struct Metric {
    /// Thumbnail success ratio (0..1, or 0..100 when `percent`).
    pub thumbnail: f64,
    /// Uptime ratio (0..1, or 0..100 when `percent`).
    pub uptime: f64,
    /// Number of unexpected process deaths.
    pub crash: u64,
    /// Mean warmup duration in seconds.
    pub warmup: f64,
}

impl Stats {
    /// Records a thumbnail attempt, optionally an error.
    pub fn record_thumbnail(&self, error: bool) {
        self.0.lock().unwrap().thumbnail.inc(error);
    }

    /// Records a process spawn.
    pub fn started(&self) {
        self.0.lock().unwrap().timed.started();
    }

    /// Records `publish_start`.
    pub fn warmup(&self) {
        self.0.lock().unwrap().timed.warmup();
    }

    /// Records `publish_stop`.
    pub fn uptime(&self) {
        self.0.lock().unwrap().timed.uptime();
    }

    /// Records an unexpected process death.
    pub fn died(&self) {
        self.0.lock().unwrap().timed.died();
    }

    /// Builds the externally-visible metric snapshot.
    #[must_use]
    pub fn metric(&self, percent: bool) -> Metric {
        let inner = self.0.lock().unwrap();
        let mult = if percent { 100.0 } else { 1.0 };
        Metric {
            thumbnail: round3(inner.thumbnail.result() * mult),
            uptime: round3(inner.timed.result() * mult),
            crash: inner.timed.death_count(),
            warmup: round3(inner.timed.warmup_mean()),
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod stats_spec {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn count_stats_ratio_is_zero_with_no_attempts() {
        let c = CountStats::default();
        assert_eq!(c.result(), 0.0);
    }

    #[test]
    fn count_stats_ratio_reflects_errors() {
        let mut c = CountStats::default();
        c.inc(false);
        c.inc(true);
        c.inc(false);
        assert!((c.result() - (2.0 / 3.0)).abs() < f64::EPSILON);
        assert_eq!(c.errors(), 1);
    }

    #[test]
    fn measure_never_exceeds_total() {
        let mut t = TimedStats::default();
        let t0 = Utc::now();
        t.started_at(t0);
        t.warmup_at(t0 + ChronoDuration::seconds(2));
        t.uptime_at(t0 + ChronoDuration::seconds(12));
        assert!(t.measure() <= t.total());
        assert!(t.measure() >= 0.0);
    }

    #[test]
    fn warmup_mean_caps_at_ten_samples() {
        let mut t = TimedStats::default();
        let t0 = Utc::now();
        for i in 0..15 {
            t.started_at(t0 + ChronoDuration::seconds(i));
            t.warmup_at(t0 + ChronoDuration::seconds(i + 1));
        }
        assert_eq!(t.warmup_samples.len(), MAX_WARMUP_SAMPLES);
    }

    #[test]
    fn death_count_tracks_died_calls() {
        let mut t = TimedStats::default();
        t.started();
        t.died();
        t.died();
        assert_eq!(t.death_count(), 2);
    }
}
