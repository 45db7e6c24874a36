//! Watches the PLC ring-number tag and stamps `ring_number` onto every
//! sample crossing the buffer (§4.5's candidate-selection and
//! aggregation queries assume every persisted row already carries the
//! ring it belongs to, so the aligner never re-derives boundaries).

use std::sync::atomic::{AtomicU64, Ordering};

use ringcore_model::{Sample, Table};

/// Tracks the current ring number observed on one source's PLC stream.
///
/// One tracker is shared across all tables for a given source: a ring
/// transition observed on the PLC table applies equally to attitude and
/// monitoring samples arriving around the same time.
#[derive(Debug, Default)]
pub struct RingTracker {
    ring_number_tag: String,
    current: Option<i64>,
    regressions: AtomicU64,
}

impl RingTracker {
    /// Creates a tracker with no ring observed yet, watching `ring_number_tag`
    /// on the PLC table.
    pub fn new(ring_number_tag: impl Into<String>) -> Self {
        Self { ring_number_tag: ring_number_tag.into(), current: None, regressions: AtomicU64::new(0) }
    }

    /// Count of observed `ring_number` regressions since this tracker was
    /// created, surfaced through `health()` (§9 decision: a decreasing ring
    /// number is a hard, surfaced condition, not silently handled).
    pub fn regressions(&self) -> u64 {
        self.regressions.load(Ordering::Relaxed)
    }

    /// Stamps `sample.ring_number` on every sample in `batch`, in order,
    /// advancing the tracked ring number whenever a PLC sample on the
    /// configured ring-number tag is observed.
    ///
    /// A ring number lower than the current one is logged as an error and
    /// ignored (the tracker never moves backwards); per design decision,
    /// this is surfaced, not treated as a crash condition.
    pub fn stamp(&mut self, batch: &mut [Sample]) {
        for sample in batch.iter_mut() {
            if sample.table == Table::Plc && sample.tag == self.ring_number_tag {
                let observed = sample.value as i64;
                match self.current {
                    Some(current) if observed < current => {
                        let _ = self.regressions.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            source_id = %sample.source_id,
                            current,
                            observed,
                            "ring number regressed; ignoring"
                        );
                    }
                    _ => self.current = Some(observed),
                }
            }
            sample.ring_number = self.current;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(table: Table, tag: &str, value: f64) -> Sample {
        Sample::new("src-1", tag, table, 0, value)
    }

    #[test]
    fn stamps_current_ring_on_every_sample() {
        let mut tracker = RingTracker::new("ring_number");
        let mut batch = vec![
            sample(Table::Plc, "ring_number", 5.0),
            sample(Table::Plc, "thrust_total", 123.0),
            sample(Table::Attitude, "pitch", 0.1),
        ];
        tracker.stamp(&mut batch);
        assert_eq!(batch[0].ring_number, Some(5));
        assert_eq!(batch[1].ring_number, Some(5));
        assert_eq!(batch[2].ring_number, Some(5));
    }

    #[test]
    fn samples_before_first_ring_observation_are_unstamped() {
        let mut tracker = RingTracker::new("ring_number");
        let mut batch = vec![sample(Table::Plc, "thrust_total", 123.0)];
        tracker.stamp(&mut batch);
        assert_eq!(batch[0].ring_number, None);
    }

    #[test]
    fn regression_is_ignored_not_applied() {
        let mut tracker = RingTracker::new("ring_number");
        let mut first = vec![sample(Table::Plc, "ring_number", 10.0)];
        tracker.stamp(&mut first);

        let mut second = vec![sample(Table::Plc, "ring_number", 9.0)];
        tracker.stamp(&mut second);
        assert_eq!(second[0].ring_number, Some(10), "tracker must not move backwards");
    }

    #[test]
    fn advances_on_new_higher_ring() {
        let mut tracker = RingTracker::new("ring_number");
        let mut first = vec![sample(Table::Plc, "ring_number", 10.0)];
        tracker.stamp(&mut first);
        let mut second = vec![sample(Table::Plc, "ring_number", 11.0), sample(Table::Attitude, "pitch", 0.0)];
        tracker.stamp(&mut second);
        assert_eq!(second[0].ring_number, Some(11));
        assert_eq!(second[1].ring_number, Some(11));
    }
}
