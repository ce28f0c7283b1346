use std::collections::VecDeque;

use log::debug;

/// Merges records from several sources, e.g. one ring buffer per CPU, into
/// one stream sorted by time.
///
/// Each source delivers its records in increasing time order, but the
/// sources are drained one after another. A record is only emitted once no
/// live source can still deliver an earlier one: every other live source
/// either has a buffered record at least as late, or has been marked as
/// drained for the current cycle.
///
/// Records without a timestamp take the time of the previous record from
/// the same source, so they keep their position relative to it.
///
/// Each source buffers at most `max_records_per_source` records. When a
/// push would exceed that, the globally oldest buffered record is emitted
/// right away. If a source that has not been drained yet later delivers an
/// even older record, the output is out of order at that point.
#[derive(Debug, Clone)]
pub struct RecordCache<T> {
    sources: Vec<Source<T>>,
    /// Records that are safe to emit, in order.
    output: VecDeque<T>,
    max_records_per_source: usize,
    next_sequence: u64,
    forced_flushes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    /// May still deliver records in this cycle.
    Pending,
    /// Has no more data in this cycle.
    Drained,
    /// Will never deliver records again.
    Closed,
}

#[derive(Debug, Clone)]
struct Source<T> {
    queue: VecDeque<CachedRecord<T>>,
    last_time: u64,
    state: SourceState,
}

#[derive(Debug, Clone)]
struct CachedRecord<T> {
    time: u64,
    sequence: u64,
    item: T,
}

impl<T> CachedRecord<T> {
    fn key(&self) -> (u64, u64) {
        (self.time, self.sequence)
    }
}

impl<T> RecordCache<T> {
    /// Creates a cache for `source_count` sources. All sources start out
    /// pending.
    pub fn new(source_count: usize, max_records_per_source: usize) -> Self {
        let sources = (0..source_count)
            .map(|_| Source {
                queue: VecDeque::new(),
                last_time: 0,
                state: SourceState::Pending,
            })
            .collect();
        Self {
            sources,
            output: VecDeque::new(),
            max_records_per_source: max_records_per_source.max(1),
            next_sequence: 0,
            forced_flushes: 0,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// The number of records held, including those ready to be popped.
    pub fn len(&self) -> usize {
        self.output.len() + self.sources.iter().map(|s| s.queue.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many records were emitted early because a source hit the bound.
    pub fn forced_flushes(&self) -> u64 {
        self.forced_flushes
    }

    /// Starts a new drain cycle: all live sources may deliver more records.
    pub fn begin_cycle(&mut self) {
        for source in &mut self.sources {
            if source.state == SourceState::Drained {
                source.state = SourceState::Pending;
            }
        }
    }

    /// Declares that `source` has no more records in the current cycle.
    pub fn mark_drained(&mut self, source: usize) {
        let source = &mut self.sources[source];
        if source.state == SourceState::Pending {
            source.state = SourceState::Drained;
        }
    }

    /// Declares that `source` will never deliver records again.
    pub fn close_source(&mut self, source: usize) {
        self.sources[source].state = SourceState::Closed;
    }

    /// Adds a record from `source`.
    pub fn push(&mut self, source: usize, time: Option<u64>, item: T) {
        while self.sources[source].queue.len() >= self.max_records_per_source {
            if let Some(item) = self.pop_oldest() {
                self.forced_flushes += 1;
                debug!("Record cache source {source} is full, flushing the oldest record");
                self.output.push_back(item);
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let s = &mut self.sources[source];
        let time = time.unwrap_or(s.last_time);
        s.last_time = s.last_time.max(time);
        let record = CachedRecord {
            time,
            sequence,
            item,
        };
        // Usually this is the end of the queue.
        let index = s.queue.partition_point(|r| r.key() <= record.key());
        s.queue.insert(index, record);
    }

    /// The index of the source holding the oldest buffered record.
    fn oldest_source(&self) -> Option<usize> {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.queue.front().map(|r| (r.key(), i)))
            .min()
            .map(|(_, i)| i)
    }

    fn pop_oldest(&mut self) -> Option<T> {
        let index = self.oldest_source()?;
        self.sources[index].queue.pop_front().map(|r| r.item)
    }

    /// Returns the next record that is safe to emit.
    pub fn pop(&mut self) -> Option<T> {
        if let Some(item) = self.output.pop_front() {
            return Some(item);
        }
        let index = self.oldest_source()?;
        let blocked = self
            .sources
            .iter()
            .enumerate()
            .any(|(i, s)| i != index && s.queue.is_empty() && s.state == SourceState::Pending);
        if blocked {
            return None;
        }
        self.sources[index].queue.pop_front().map(|r| r.item)
    }

    /// Closes all sources and returns every remaining record in order.
    pub fn finish(&mut self) -> Vec<T> {
        for source in &mut self.sources {
            source.state = SourceState::Closed;
        }
        let mut items = Vec::with_capacity(self.len());
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn waits_for_pending_sources() {
        let mut cache = RecordCache::new(2, 16);
        cache.push(0, Some(10), "a10");
        cache.push(0, Some(30), "a30");
        // Source 1 might still deliver something older.
        assert_eq!(cache.pop(), None);
        cache.mark_drained(0);
        assert_eq!(cache.pop(), None);
        cache.push(1, Some(20), "b20");
        assert_eq!(cache.pop(), Some("a10"));
        assert_eq!(cache.pop(), Some("b20"));
        // Source 1 is empty and still pending.
        assert_eq!(cache.pop(), None);
        cache.mark_drained(1);
        assert_eq!(cache.pop(), Some("a30"));
        assert!(cache.is_empty());
    }

    #[test]
    fn records_without_time_stay_behind_their_predecessor() {
        let mut cache = RecordCache::new(2, 16);
        cache.push(0, Some(5), "a5");
        cache.push(0, None, "a-untimed");
        cache.push(1, Some(3), "b3");
        cache.push(1, Some(6), "b6");
        assert_eq!(cache.finish(), vec!["b3", "a5", "a-untimed", "b6"]);
    }

    #[test]
    fn closed_sources_do_not_block() {
        let mut cache = RecordCache::new(3, 16);
        cache.close_source(2);
        cache.push(0, Some(2), 2);
        cache.push(1, Some(1), 1);
        assert_eq!(cache.pop(), Some(1));
        assert_eq!(cache.pop(), None);
        cache.begin_cycle();
        cache.mark_drained(1);
        assert_eq!(cache.pop(), Some(2));
    }

    #[test]
    fn skewed_sources_come_out_sorted() {
        // Four sources with different clocks, drained in chunks of uneven size.
        let mut streams: Vec<Vec<u64>> = (0..4u64)
            .map(|s| (0..50u64).map(|i| i * (s + 3) + s * 7).collect())
            .collect();
        let mut cache = RecordCache::new(streams.len(), 1000);
        let mut out = Vec::new();
        let mut round = 0;
        while streams.iter().any(|s| !s.is_empty()) {
            for (source, stream) in streams.iter_mut().enumerate() {
                let take = ((round * 7 + source * 3) % 11).min(stream.len());
                for time in stream.drain(..take) {
                    cache.push(source, Some(time), time);
                    while let Some(t) = cache.pop() {
                        out.push(t);
                    }
                }
            }
            round += 1;
        }
        out.extend(cache.finish());
        assert_eq!(out.len(), 200);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(cache.forced_flushes(), 0);
    }

    #[test]
    fn overflow_flushes_the_oldest() {
        let mut cache = RecordCache::new(2, 2);
        cache.push(1, Some(1), 1);
        cache.push(0, Some(2), 2);
        cache.push(0, Some(3), 3);
        cache.push(0, Some(4), 4);
        // Flushing starts with the oldest record overall, and stops once
        // source 0 has room.
        assert_eq!(cache.forced_flushes(), 2);
        assert_eq!(cache.pop(), Some(1));
        assert_eq!(cache.pop(), Some(2));
        assert_eq!(cache.finish(), vec![3, 4]);
    }
}
