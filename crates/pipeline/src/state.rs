//! Per-tag rolling state owned exclusively by one [`crate::QualityPipeline`]
//! instance. Never behind a shared mutex (§9 "rolling per-tag state" design
//! note): the pipeline that owns a tag's history is the only writer.

use std::collections::VecDeque;

use ringcore_model::Table;

/// A gap held by the interpolation stage, waiting for either a forward
/// sample to arrive (to interpolate between) or its deadline to pass (to
/// fall back to a flat hold of the previous value).
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingGap {
    /// The timestamp the gap was detected at; the output sample (whichever
    /// way it resolves) is stamped with this timestamp.
    pub(crate) gap_ts: i64,
    /// The last good `(timestamp, value)` known before the gap, used as the
    /// interpolation/hold anchor.
    pub(crate) previous: (i64, f64),
    /// `gap_ts + gap_max`: once `tick` observes a timestamp past this with no
    /// forward sample, the held previous value is emitted (§4.2 stage 2).
    pub(crate) deadline_ts: i64,
}

/// Rolling history for one tag: the last `N` good samples (for
/// forward-compatibility with richer smoothing), the most recent good
/// sample (the interpolation anchor), and at most one pending gap.
#[derive(Debug)]
pub(crate) struct TagState {
    history: VecDeque<(i64, f64)>,
    history_cap: usize,
    /// The destination table this tag belongs to, captured from the first
    /// sample seen for it; used to stamp synthetic gap-fill samples that
    /// `tick` emits with no triggering sample of their own to copy it from.
    pub(crate) table: Table,
    pub(crate) last_good: Option<(i64, f64)>,
    pub(crate) pending_gap: Option<PendingGap>,
}

impl TagState {
    pub(crate) fn new(history_cap: usize, table: Table) -> Self {
        Self {
            history: VecDeque::with_capacity(history_cap.max(1)),
            history_cap: history_cap.max(1),
            table,
            last_good: None,
            pending_gap: None,
        }
    }

    /// Records a good (possibly interpolated or calibrated) sample into the
    /// rolling history, evicting the oldest entry once `history_cap` is
    /// exceeded.
    pub(crate) fn push_good(&mut self, timestamp_ms: i64, value: f64) {
        if self.history.len() == self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back((timestamp_ms, value));
        self.last_good = Some((timestamp_ms, value));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_good_evicts_beyond_capacity() {
        let mut state = TagState::new(2, Table::Plc);
        state.push_good(0, 1.0);
        state.push_good(1000, 2.0);
        state.push_good(2000, 3.0);
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.last_good, Some((2000, 3.0)));
    }
}
