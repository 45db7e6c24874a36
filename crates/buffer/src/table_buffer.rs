//! The bounded per-table FIFO itself (§4.3).

use std::collections::VecDeque;

use ringcore_config::OverflowPolicy;
use ringcore_model::Sample;

/// Outcome of attempting to append to a [`TableBuffer`].
#[derive(Debug, PartialEq)]
pub(crate) enum PushOutcome {
    /// The sample was appended.
    Appended,
    /// The buffer was full and the oldest resident record was evicted to
    /// make room (`OverflowPolicy::DropOldest`).
    DroppedOldest,
    /// The buffer was full and the incoming record was discarded
    /// (`OverflowPolicy::DropNewest`).
    DroppedNewest,
    /// The buffer was full and the policy is `Block`; the sample was not
    /// stored and is handed back to the caller to retry once space frees.
    Full(Sample),
}

/// A bounded FIFO of samples awaiting a flush to the store.
pub(crate) struct TableBuffer {
    queue: VecDeque<Sample>,
    max_size: usize,
}

impl TableBuffer {
    pub(crate) fn new(max_size: usize) -> Self {
        Self { queue: VecDeque::with_capacity(max_size.min(1024)), max_size }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn push(&mut self, sample: Sample, policy: OverflowPolicy) -> PushOutcome {
        if self.queue.len() < self.max_size {
            self.queue.push_back(sample);
            return PushOutcome::Appended;
        }
        match policy {
            OverflowPolicy::DropOldest => {
                let _ = self.queue.pop_front();
                self.queue.push_back(sample);
                PushOutcome::DroppedOldest
            }
            OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
            OverflowPolicy::Block => PushOutcome::Full(sample),
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<Sample> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ringcore_model::Table;

    fn sample(v: f64) -> Sample {
        Sample::new("src-1", "thrust_total", Table::Plc, 0, v)
    }

    #[test]
    fn appends_below_capacity() {
        let mut buf = TableBuffer::new(2);
        assert_eq!(buf.push(sample(1.0), OverflowPolicy::DropOldest), PushOutcome::Appended);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn drop_oldest_evicts_front() {
        let mut buf = TableBuffer::new(2);
        let _ = buf.push(sample(1.0), OverflowPolicy::DropOldest);
        let _ = buf.push(sample(2.0), OverflowPolicy::DropOldest);
        assert_eq!(buf.push(sample(3.0), OverflowPolicy::DropOldest), PushOutcome::DroppedOldest);
        let drained = buf.drain();
        assert_eq!(drained.iter().map(|s| s.value).collect::<Vec<_>>(), vec![2.0, 3.0]);
    }

    #[test]
    fn drop_newest_discards_incoming() {
        let mut buf = TableBuffer::new(1);
        let _ = buf.push(sample(1.0), OverflowPolicy::DropNewest);
        assert_eq!(buf.push(sample(2.0), OverflowPolicy::DropNewest), PushOutcome::DroppedNewest);
        let drained = buf.drain();
        assert_eq!(drained.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1.0]);
    }

    #[test]
    fn block_hands_the_sample_back_without_mutating() {
        let mut buf = TableBuffer::new(1);
        let _ = buf.push(sample(1.0), OverflowPolicy::Block);
        match buf.push(sample(2.0), OverflowPolicy::Block) {
            PushOutcome::Full(returned) => assert_eq!(returned.value, 2.0),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn drain_empties_the_buffer() {
        let mut buf = TableBuffer::new(4);
        let _ = buf.push(sample(1.0), OverflowPolicy::DropOldest);
        let _ = buf.push(sample(2.0), OverflowPolicy::DropOldest);
        assert_eq!(buf.drain().len(), 2);
        assert_eq!(buf.len(), 0);
    }
}
