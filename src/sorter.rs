use std::collections::VecDeque;

/// Orders the records of a file which were written in rounds.
///
/// The recorder reads all ring buffers once per round and then writes a
/// `FINISHED_ROUND` record. A record written in round N + 2 can never be
/// older than the newest record of round N, because by then every ring
/// buffer has been drained past that point. So at the end of each round,
/// all pending values up to the newest key of the previous round can be
/// released in order.
#[derive(Debug, Clone)]
pub struct RoundSorter<K, V> {
    /// Sorted values which no later value can precede.
    ready: VecDeque<V>,
    /// Values of the current and the previous round, unsorted.
    pending: Vec<(K, V)>,
    /// The largest key pushed so far.
    max_key: Option<K>,
    /// The largest key pushed before the previous `end_round`.
    previous_round_max_key: Option<K>,
}

impl<K, V> Default for RoundSorter<K, V> {
    fn default() -> Self {
        Self {
            ready: VecDeque::new(),
            pending: Vec::new(),
            max_key: None,
            previous_round_max_key: None,
        }
    }
}

impl<K: Ord + Clone, V> RoundSorter<K, V> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether `pop` will return a value. If not, read the next round.
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn pop(&mut self) -> Option<V> {
        self.ready.pop_front()
    }

    pub fn push(&mut self, key: K, value: V) {
        if self.max_key.as_ref().map_or(true, |max| key > *max) {
            self.max_key = Some(key.clone());
        }
        self.pending.push((key, value));
    }

    /// Releases everything which is not newer than the newest value of the
    /// previous round.
    pub fn end_round(&mut self) {
        if let Some(limit) = &self.previous_round_max_key {
            // Stable, so equal keys keep their file order.
            self.pending.sort_by(|a, b| a.0.cmp(&b.0));
            let count = self.pending.partition_point(|(key, _)| key <= limit);
            self.ready
                .extend(self.pending.drain(..count).map(|(_, value)| value));
        }
        self.previous_round_max_key = self.max_key.clone();
    }

    /// Releases everything. Nothing may be pushed afterwards.
    pub fn finish(&mut self) {
        self.pending.sort_by(|a, b| a.0.cmp(&b.0));
        self.ready
            .extend(self.pending.drain(..).map(|(_, value)| value));
        self.previous_round_max_key = self.max_key.clone();
    }
}

#[cfg(test)]
mod test {
    use super::RoundSorter;

    fn drain(sorter: &mut RoundSorter<u64, &'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| sorter.pop()).collect()
    }

    #[test]
    fn releases_one_round_behind() {
        let mut sorter = RoundSorter::new();
        // Round 1: cpu 0 has 10 and 30, cpu 1 has 20.
        sorter.push(10, "a");
        sorter.push(30, "b");
        sorter.push(20, "c");
        sorter.end_round();
        assert!(!sorter.has_ready());

        // Round 2: cpu 1 was slow and still delivers 25.
        sorter.push(25, "d");
        sorter.push(40, "e");
        sorter.end_round();
        assert_eq!(drain(&mut sorter), vec!["a", "c", "d", "b"]);

        // An empty round still moves the limit forward.
        sorter.end_round();
        assert_eq!(drain(&mut sorter), vec!["e"]);

        sorter.push(50, "f");
        sorter.push(45, "g");
        sorter.finish();
        assert_eq!(drain(&mut sorter), vec!["g", "f"]);
    }

    #[test]
    fn equal_keys_keep_their_order() {
        let mut sorter = RoundSorter::new();
        sorter.push(5, "first");
        sorter.push(5, "second");
        sorter.push(1, "zero");
        sorter.finish();
        assert_eq!(drain(&mut sorter), vec!["zero", "first", "second"]);
    }
}
