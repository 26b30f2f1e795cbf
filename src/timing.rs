//! Wall-clock timing of pipeline stages.
//!
//! A [`Timings`] value is owned by the engine and passed by reference; every
//! measured stage is logged at debug level and kept for later inspection.

use crate::halo_error::Stage;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    pub snapshot: usize,
    pub stage: Stage,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct Timings {
    entries: Mutex<Vec<StageTiming>>,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f`, records how long it took and logs it.
    pub fn time<R>(&self, snapshot: usize, stage: Stage, f: impl FnOnce() -> R) -> R {
        let tic = Instant::now();
        let out = f();
        self.record(snapshot, stage, tic.elapsed());
        out
    }

    pub fn record(&self, snapshot: usize, stage: Stage, elapsed: Duration) {
        log::debug!("{stage} took {} microseconds", elapsed.as_micros());
        self.entries.lock().push(StageTiming {
            snapshot,
            stage,
            elapsed,
        });
    }

    /// Snapshot of every entry recorded so far.
    pub fn entries(&self) -> Vec<StageTiming> {
        self.entries.lock().clone()
    }

    pub fn snapshot_total(&self, snapshot: usize) -> Duration {
        self.entries
            .lock()
            .iter()
            .filter(|t| t.snapshot == snapshot)
            .map(|t| t.elapsed)
            .sum()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn log_summary(&self, snapshot: usize) {
        let entries = self.entries.lock();
        for t in entries.iter().filter(|t| t.snapshot == snapshot) {
            log::info!("  {:<26} {:>10} us", t.stage.to_string(), t.elapsed.as_micros());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_call_order() {
        let t = Timings::new();
        let v = t.time(2, Stage::Binning, || 41 + 1);
        assert_eq!(v, 42);
        t.record(2, Stage::Output, Duration::from_micros(5));
        t.record(3, Stage::Output, Duration::from_micros(7));
        let stages: Vec<Stage> = t.entries().iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec![Stage::Binning, Stage::Output, Stage::Output]);
        assert!(t.snapshot_total(2) >= Duration::from_micros(5));
        assert_eq!(t.snapshot_total(3), Duration::from_micros(7));
        t.clear();
        assert!(t.entries().is_empty());
    }
}
