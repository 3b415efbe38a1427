//! K-way merger: merges any number of [`RecordSource`]s into one sorted stream,
//! ordered by prefix with the caller's [`RecordCompare`] breaking ties.
use crate::record::{CurrentRecord, RecordCompare, RecordSource};
use crate::result::Result;

/// Builds a [`MergedCursor`] from zero or more sources. Sources are "primed" (their
/// first record loaded) as they're added, which is why `add_if_not_empty` takes
/// ownership: an un-primed, not-yet-consulted source would break the invariant every
/// active source in a [`MergedCursor`] always has a valid `current()`.
pub struct KWayMerger {
    record_cmp: RecordCompare,
    sources: Vec<Box<dyn RecordSource + Send>>,
}

impl KWayMerger {
    pub fn new(record_cmp: RecordCompare, capacity_hint: usize) -> Self {
        Self {
            record_cmp,
            sources: Vec::with_capacity(capacity_hint),
        }
    }

    pub fn add_if_not_empty(&mut self, mut source: Box<dyn RecordSource + Send>) -> Result<()> {
        if source.has_next() {
            source.load_next()?;
            self.sources.push(source);
        }
        Ok(())
    }

    pub fn sorted_iterator(self) -> MergedCursor {
        let total = self.sources.iter().map(|s| s.num_records()).sum();
        MergedCursor {
            record_cmp: self.record_cmp,
            sources: self.sources,
            current: None,
            total,
        }
    }
}

/// The merger's output. A plain linear scan over active sources per record: merging
/// spill-run counts in this crate are small enough that a binary heap buys nothing but
/// complexity (see DESIGN.md).
pub struct MergedCursor {
    record_cmp: RecordCompare,
    sources: Vec<Box<dyn RecordSource + Send>>,
    current: Option<(Vec<u8>, u64)>,
    total: usize,
}

impl MergedCursor {
    fn select_winner(&self) -> usize {
        let mut winner = 0;
        for i in 1..self.sources.len() {
            let a = self.sources[winner].current();
            let b = self.sources[i].current();
            let ordering = a.prefix.cmp(&b.prefix).then_with(|| (self.record_cmp)(a.bytes, b.bytes));
            if ordering == std::cmp::Ordering::Greater {
                winner = i;
            }
        }
        winner
    }
}

impl RecordSource for MergedCursor {
    fn has_next(&self) -> bool {
        !self.sources.is_empty()
    }

    fn load_next(&mut self) -> Result<()> {
        if self.sources.is_empty() {
            return Ok(());
        }

        let winner = self.select_winner();
        let rec = self.sources[winner].current();
        self.current = Some((rec.bytes.to_vec(), rec.prefix));

        if self.sources[winner].has_next() {
            self.sources[winner].load_next()?;
        } else {
            self.sources.remove(winner);
        }

        Ok(())
    }

    fn current(&self) -> CurrentRecord<'_> {
        let (bytes, prefix) = self
            .current
            .as_ref()
            .expect("load_next must be called before current");
        CurrentRecord { bytes, prefix: *prefix }
    }

    fn num_records(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource {
        records: Vec<(u64, Vec<u8>)>,
        pos: usize,
    }

    impl RecordSource for VecSource {
        fn has_next(&self) -> bool {
            self.pos < self.records.len()
        }

        fn load_next(&mut self) -> Result<()> {
            self.pos += 1;
            Ok(())
        }

        fn current(&self) -> CurrentRecord<'_> {
            let (prefix, bytes) = &self.records[self.pos - 1];
            CurrentRecord { bytes, prefix: *prefix }
        }

        fn num_records(&self) -> usize {
            self.records.len()
        }
    }

    fn source(prefixes: &[u64]) -> Box<dyn RecordSource + Send> {
        Box::new(VecSource {
            records: prefixes.iter().map(|p| (*p, p.to_le_bytes().to_vec())).collect(),
            pos: 0,
        })
    }

    #[test]
    fn merges_three_sorted_runs() {
        let mut merger = KWayMerger::new(Box::new(|a: &[u8], b: &[u8]| a.cmp(b)), 3);
        merger.add_if_not_empty(source(&[1, 4, 9])).unwrap();
        merger.add_if_not_empty(source(&[2, 3])).unwrap();
        merger.add_if_not_empty(source(&[])).unwrap();
        merger.add_if_not_empty(source(&[0, 5, 6])).unwrap();

        let mut cursor = merger.sorted_iterator();
        let mut out = Vec::new();
        while cursor.has_next() {
            cursor.load_next().unwrap();
            out.push(cursor.current().prefix);
        }

        assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 9]);
    }
}
