//! K-way run merger.

use std::cmp::Ordering;
use std::marker::PhantomData;

use log;

use crate::heap::{HeapEntry, MinHeap};
use crate::run::{Run, RunError};

/// Merge statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of runs registered in the merger.
    pub runs_registered: usize,
    /// Number of exhausted runs released by the merger.
    pub runs_released: usize,
    /// Number of records emitted so far.
    pub records_emitted: usize,
    /// Maximum number of entries the heap held at once.
    pub peak_heap_len: usize,
}

/// Binary heap run merger.
/// Merges multiple sorted runs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of runs.
///
/// The heap owns the head record of every active run, so at most one entry per run is held at any
/// time. Records comparing equal are emitted in ascending tie-break key order (the run registration
/// index unless given explicitly), then in their order within the run.
///
/// The merger is lazy: every call to [`Iterator::next`] performs a single extraction and a single
/// run advance. A run read error is returned once after which the merger yields nothing.
pub struct RunMerger<T, R, F>
where
    R: Run<T>,
    F: Fn(&T, &T) -> Ordering,
{
    heap: MinHeap<T, F>,
    runs: Vec<Option<R>>,
    pending_error: Option<RunError>,
    release_warnings: Vec<RunError>,
    stats: MergeStats,

    item_type: PhantomData<T>,
}

impl<T, R, F> RunMerger<T, R, F>
where
    R: Run<T>,
    F: Fn(&T, &T) -> Ordering,
{
    /// Creates an empty merger. Runs are added using [`RunMerger::register`].
    pub fn new(compare: F) -> Self {
        RunMerger {
            heap: MinHeap::new(compare),
            runs: Vec::new(),
            pending_error: None,
            release_warnings: Vec::new(),
            stats: MergeStats::default(),
            item_type: PhantomData,
        }
    }

    /// Creates a merger over the provided runs. Run items should be sorted according to `compare`
    /// otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `runs` - Runs to be merged in a single sorted one
    /// * `compare` - Function be be used to compare records
    pub fn merge<I>(runs: I, compare: F) -> Result<Self, RunError>
    where
        I: IntoIterator<Item = R>,
    {
        let mut merger = RunMerger::new(compare);
        for run in runs {
            let tie_break = merger.runs.len() as u64;
            merger.register(run, tie_break)?;
        }

        return Ok(merger);
    }

    /// Registers a new run moving its head record into the heap.
    ///
    /// Runs may be registered while merging is in progress, but records of a late run that precede
    /// already emitted records are emitted out of order.
    ///
    /// # Arguments
    /// * `run` - Sorted run
    /// * `tie_break` - Key ordering the run's records against equal records of other runs
    pub fn register(&mut self, mut run: R, tie_break: u64) -> Result<(), RunError> {
        let origin = self.runs.len();
        self.stats.runs_registered += 1;

        match run.advance()? {
            Some(head) => {
                self.heap.insert(HeapEntry::new(head, origin, tie_break));
                self.stats.peak_heap_len = self.stats.peak_heap_len.max(self.heap.len());
                self.runs.push(Some(run));
            }
            None => {
                self.runs.push(None);
                self.release(origin, run);
            }
        }

        log::debug!("run {} registered (tie-break: {})", origin, tie_break);

        return Ok(());
    }

    /// Returns the number of runs not exhausted yet.
    pub fn active_runs(&self) -> usize {
        self.heap.len()
    }

    /// Returns merge statistics.
    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Returns the errors that occurred while releasing exhausted runs.
    /// They don't affect the emitted records.
    pub fn release_warnings(&self) -> &[RunError] {
        &self.release_warnings
    }

    /// Stops merging dropping all the remaining runs.
    pub fn abandon(&mut self) {
        self.heap.clear();
        self.runs.clear();
        self.pending_error = None;
    }

    fn release(&mut self, origin: usize, run: R) {
        self.stats.runs_released += 1;
        if let Err(err) = run.release() {
            log::warn!("run {} release failed: {}", origin, err);
            self.release_warnings.push(err);
        }
    }

    fn refill(&mut self, origin: usize, tie_break: u64) {
        let run = match self.runs.get_mut(origin).and_then(Option::as_mut) {
            Some(run) => run,
            None => return,
        };

        match run.advance() {
            Ok(Some(head)) => self.heap.insert(HeapEntry::new(head, origin, tie_break)),
            Ok(None) => {
                if let Some(run) = self.runs[origin].take() {
                    self.release(origin, run);
                }
            }
            Err(err) => self.pending_error = Some(err),
        }
    }
}

impl<T, R, F> Iterator for RunMerger<T, R, F>
where
    R: Run<T>,
    F: Fn(&T, &T) -> Ordering,
{
    type Item = Result<T, RunError>;

    /// Returns the next record from the runs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            self.abandon();
            return Some(Err(err));
        }

        let entry = match self.heap.extract_min() {
            Some(entry) => entry,
            None => {
                if !self.runs.is_empty() {
                    if self.release_warnings.is_empty() {
                        log::debug!("merge done ({} records emitted)", self.stats.records_emitted);
                    } else {
                        log::warn!(
                            "merge done ({} records emitted), {} of {} runs failed to release",
                            self.stats.records_emitted,
                            self.release_warnings.len(),
                            self.stats.runs_released,
                        );
                    }
                    self.runs.clear();
                }
                return None;
            }
        };

        self.refill(entry.origin, entry.tie_break);
        self.stats.records_emitted += 1;

        return Some(Ok(entry.record));
    }
}
