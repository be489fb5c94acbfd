//! The live snapshot list: every sequence number a read is currently pinned to, used both to
//! serve consistent reads and to compute the compaction drop horizon (the oldest sequence any
//! snapshot can still observe).

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::format::SequenceNumber;

#[derive(Debug, Default)]
struct Inner {
    /// Sequence number -> count of live `Snapshot` handles pinned to it. Several snapshots can
    /// share a sequence number if no write happened between them.
    refs: BTreeMap<SequenceNumber, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotList(Arc<Mutex<Inner>>);

impl SnapshotList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn acquire(&self, sequence: SequenceNumber) -> Snapshot {
        *self.0.lock().refs.entry(sequence).or_insert(0) += 1;
        Snapshot { list: self.clone(), sequence }
    }

    /// The sequence number below which no live snapshot can observe an entry; compactions may
    /// drop any entry shadowed at or below this sequence.
    #[must_use]
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.0.lock().refs.keys().next().copied()
    }

    fn release(&self, sequence: SequenceNumber) {
        let mut inner = self.0.lock();
        if let Some(count) = inner.refs.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                inner.refs.remove(&sequence);
            }
        }
    }
}

/// A handle to a read-consistent point in time. Reads taken through [`crate::Db::get`] or
/// [`crate::Db::iterator`] with this snapshot observe exactly the writes committed up to and
/// including `sequence`. Dropping the snapshot releases its pin on the compaction drop horizon.
#[derive(Debug)]
pub struct Snapshot {
    list: SnapshotList,
    sequence: SequenceNumber,
}

impl Snapshot {
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_tracks_the_minimum_live_sequence() {
        let list = SnapshotList::new();
        let a = list.acquire(SequenceNumber(5));
        let _b = list.acquire(SequenceNumber(10));
        assert_eq!(list.oldest(), Some(SequenceNumber(5)));
        drop(a);
        assert_eq!(list.oldest(), Some(SequenceNumber(10)));
    }

    #[test]
    fn oldest_is_none_with_no_live_snapshots() {
        let list = SnapshotList::new();
        assert_eq!(list.oldest(), None);
    }

    #[test]
    fn shared_sequence_survives_until_last_release() {
        let list = SnapshotList::new();
        let a = list.acquire(SequenceNumber(1));
        let b = list.acquire(SequenceNumber(1));
        drop(a);
        assert_eq!(list.oldest(), Some(SequenceNumber(1)));
        drop(b);
        assert_eq!(list.oldest(), None);
    }
}
