//! Comparator driven binary min-heap.

use std::cmp::Ordering;

/// Heap entry: a record together with the run it came from.
#[derive(Debug)]
pub struct HeapEntry<T> {
    /// Record exposed by the run.
    pub record: T,
    /// Index of the run the record belongs to.
    pub origin: usize,
    /// Key ordering entries whose records compare equal.
    pub tie_break: u64,
    seq: u64,
}

impl<T> HeapEntry<T> {
    /// Creates a new entry. The sequence number is assigned on insertion.
    pub fn new(record: T, origin: usize, tie_break: u64) -> Self {
        HeapEntry {
            record,
            origin,
            tie_break,
            seq: 0,
        }
    }
}

/// Binary min-heap ordered by a user supplied compare function.
///
/// Entries with equal records are ordered by their tie-break key first and by insertion order
/// second, so the extraction order is fully deterministic.
/// Insertion and extraction take *log*(*n*) time, peeking is constant.
pub struct MinHeap<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    entries: Vec<HeapEntry<T>>,
    compare: F,
    next_seq: u64,
}

impl<T, F> MinHeap<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    /// Creates an empty heap.
    pub fn new(compare: F) -> Self {
        Self::with_capacity(0, compare)
    }

    /// Creates an empty heap able to hold `capacity` entries without reallocation.
    pub fn with_capacity(capacity: usize, compare: F) -> Self {
        MinHeap {
            entries: Vec::with_capacity(capacity),
            compare,
            next_seq: 0,
        }
    }

    /// Inserts an entry.
    pub fn insert(&mut self, mut entry: HeapEntry<T>) {
        entry.seq = self.next_seq;
        self.next_seq += 1;

        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    /// Removes and returns the minimum entry or [`None`] if the heap is empty.
    pub fn extract_min(&mut self) -> Option<HeapEntry<T>> {
        if self.entries.is_empty() {
            return None;
        }

        let min = self.entries.swap_remove(0);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }

        return Some(min);
    }

    /// Returns the minimum entry without removing it.
    pub fn peek_min(&self) -> Option<&HeapEntry<T>> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all the entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (a, b) = (&self.entries[a], &self.entries[b]);

        (self.compare)(&a.record, &b.record)
            .then(a.tie_break.cmp(&b.tie_break))
            .then(a.seq.cmp(&b.seq))
            == Ordering::Less
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.less(idx, parent) {
                break;
            }
            self.entries.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;

            let mut smallest = idx;
            if left < len && self.less(left, smallest) {
                smallest = left;
            }
            if right < len && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }

            self.entries.swap(idx, smallest);
            idx = smallest;
        }
    }
}

#[cfg(test)]
mod test {
    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{HeapEntry, MinHeap};

    #[rstest]
    #[case(vec![])]
    #[case(vec![1])]
    #[case(vec![5, 3, 1, 4, 2])]
    #[case(vec![2, 2, 1, 1, 0, 0])]
    fn test_extract_order(#[case] records: Vec<i32>) {
        let mut heap = MinHeap::new(|a: &i32, b: &i32| a.cmp(b));
        for (origin, record) in records.iter().enumerate() {
            heap.insert(HeapEntry::new(*record, origin, 0));
        }
        assert_eq!(heap.len(), records.len());

        let mut actual = Vec::new();
        while let Some(entry) = heap.extract_min() {
            actual.push(entry.record);
        }

        let mut expected = records.clone();
        expected.sort();
        assert_eq!(actual, expected);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_empty_heap() {
        let mut heap = MinHeap::new(|a: &i32, b: &i32| a.cmp(b));
        assert!(heap.peek_min().is_none());
        assert!(heap.extract_min().is_none());
        assert_eq!(heap.len(), 0);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut heap = MinHeap::new(|a: &i32, b: &i32| a.cmp(b));
        heap.insert(HeapEntry::new(7, 0, 0));
        heap.insert(HeapEntry::new(3, 1, 0));

        assert_eq!(heap.peek_min().map(|e| e.record), Some(3));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.extract_min().map(|e| e.origin), Some(1));
        assert_eq!(heap.peek_min().map(|e| e.record), Some(7));
    }

    #[test]
    fn test_ties_broken_by_key_then_insertion() {
        // compare only the first field so that the second one exposes extraction order
        let mut heap = MinHeap::new(|a: &(i32, char), b: &(i32, char)| a.0.cmp(&b.0));
        heap.insert(HeapEntry::new((1, 'c'), 0, 2));
        heap.insert(HeapEntry::new((1, 'a'), 1, 0));
        heap.insert(HeapEntry::new((0, 'z'), 2, 9));
        heap.insert(HeapEntry::new((1, 'b'), 3, 0));

        let actual: Vec<char> = std::iter::from_fn(|| heap.extract_min()).map(|e| e.record.1).collect();
        assert_eq!(actual, vec!['z', 'a', 'b', 'c']);
    }

    #[test]
    fn test_reversed_compare() {
        let mut records = Vec::from_iter(0..100);
        records.shuffle(&mut rand::thread_rng());

        let mut heap = MinHeap::with_capacity(records.len(), |a: &i32, b: &i32| a.cmp(b).reverse());
        for record in records {
            heap.insert(HeapEntry::new(record, 0, 0));
        }

        let actual: Vec<i32> = std::iter::from_fn(|| heap.extract_min()).map(|e| e.record).collect();
        assert_eq!(actual, Vec::from_iter((0..100).rev()));
    }
}
