//! Sorted runs generator.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::error::Error;
use std::marker::PhantomData;
use std::sync::Arc;

use log;
use rayon::prelude::*;

use crate::run::RunStorage;
use crate::sort::SortError;

/// Sorted runs generator.
///
/// Reads the input by blocks of `chunk_size` records, sorts every block in memory and stores it as a run.
/// Runs are produced lazily, each one labeled with the index of the input block it was built from.
///
/// If a thread pool is provided, blocks are read in batches of pool size and sorted concurrently.
/// The produced runs are the same as in sequential mode.
pub struct RunGenerator<T, E, I, F, S>
where
    E: Error,
    I: Iterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering,
    S: RunStorage<T>,
{
    input: I,
    compare: F,
    chunk_size: usize,
    storage: S,
    thread_pool: Option<Arc<rayon::ThreadPool>>,

    /// Runs built but not yet consumed.
    ready: VecDeque<(u64, S::Run)>,
    next_block: u64,
    /// Number of records the input claims to hold.
    expected: (usize, Option<usize>),
    pulled: usize,
    finished: bool,

    error_type: PhantomData<E>,
}

impl<T, E, I, F, S> RunGenerator<T, E, I, F, S>
where
    T: Send,
    E: Error + Send,
    I: Iterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    S: RunStorage<T>,
{
    /// Creates a new runs generator. No record is read until the first run is requested.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `compare` - Function be be used to compare records
    /// * `chunk_size` - Maximum number of records in a run
    /// * `storage` - Storage runs are materialized in
    pub fn new<II>(input: II, compare: F, chunk_size: usize, storage: S) -> Result<Self, SortError<E>>
    where
        II: IntoIterator<Item = Result<T, E>, IntoIter = I>,
    {
        if chunk_size == 0 {
            return Err(SortError::InvalidConfiguration("chunk size must be positive".to_string()));
        }

        let input = input.into_iter();
        let expected = input.size_hint();

        return Ok(RunGenerator {
            input,
            compare,
            chunk_size,
            storage,
            thread_pool: None,
            ready: VecDeque::new(),
            next_block: 0,
            expected,
            pulled: 0,
            finished: false,
            error_type: PhantomData,
        });
    }

    /// Sets the thread pool blocks are sorted in.
    pub fn with_thread_pool(mut self, thread_pool: Arc<rayon::ThreadPool>) -> Self {
        self.thread_pool = Some(thread_pool);
        return self;
    }

    /// Returns the number of records read from the input so far.
    pub fn records_read(&self) -> usize {
        self.pulled
    }

    fn read_block(&mut self) -> Result<Option<Vec<T>>, SortError<E>> {
        let mut block = Vec::with_capacity(self.chunk_size.min(self.expected.0.saturating_sub(self.pulled)).max(1));

        while block.len() < self.chunk_size {
            match self.input.next() {
                Some(Ok(record)) => {
                    self.pulled += 1;
                    if let Some(upper) = self.expected.1 {
                        if self.pulled > upper {
                            return Err(self.mismatch());
                        }
                    }
                    block.push(record);
                }
                Some(Err(err)) => return Err(SortError::InputError(err)),
                None => {
                    if self.pulled < self.expected.0 {
                        return Err(self.mismatch());
                    }
                    break;
                }
            }
        }

        return Ok(if block.is_empty() { None } else { Some(block) });
    }

    fn mismatch(&self) -> SortError<E> {
        SortError::SourceExhaustionMismatch {
            lower: self.expected.0,
            upper: self.expected.1,
            actual: self.pulled,
        }
    }

    fn generate_sequential(&mut self) -> Result<(), SortError<E>> {
        if let Some(mut block) = self.read_block()? {
            let idx = self.next_block;
            self.next_block += 1;

            block.sort_by(self.compare);
            let run = build_run::<_, E, _, _>(&self.storage, block, self.compare, idx)?;
            self.ready.push_back((idx, run));
        } else {
            self.finished = true;
        }

        return Ok(());
    }

    fn generate_parallel(&mut self, thread_pool: &rayon::ThreadPool) -> Result<(), SortError<E>> {
        let mut batch = Vec::with_capacity(thread_pool.current_num_threads());
        while batch.len() < thread_pool.current_num_threads() {
            match self.read_block()? {
                Some(block) => {
                    batch.push((self.next_block, block));
                    self.next_block += 1;
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            return Ok(());
        }

        log::debug!("sorting batch of {} blocks ...", batch.len());
        let storage = &self.storage;
        let compare = self.compare;
        let runs: Vec<Result<(u64, S::Run), SortError<E>>> = thread_pool.install(|| {
            batch
                .into_par_iter()
                .map(|(idx, mut block)| {
                    block.sort_by(compare);
                    build_run(storage, block, compare, idx).map(|run| (idx, run))
                })
                .collect()
        });

        for run in runs {
            self.ready.push_back(run?);
        }

        return Ok(());
    }
}

fn build_run<T, E, F, S>(storage: &S, block: Vec<T>, compare: F, idx: u64) -> Result<S::Run, SortError<E>>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering,
    S: RunStorage<T>,
{
    if let Err(msg) = check_total_order(&block, compare) {
        return Err(SortError::InvalidConfiguration(msg));
    }

    log::debug!("saving run {} ({} records)", idx, block.len());
    let run = storage.store(block)?;

    return Ok(run);
}

/// Validates the compare function on a block it has just sorted.
fn check_total_order<T, F>(block: &[T], compare: F) -> Result<(), String>
where
    F: Fn(&T, &T) -> Ordering,
{
    if let Some(first) = block.first() {
        if compare(first, first) != Ordering::Equal {
            return Err("comparator is not reflexive".to_string());
        }
    }

    for pair in block.windows(2) {
        let forward = compare(&pair[0], &pair[1]);
        if forward == Ordering::Greater || compare(&pair[1], &pair[0]) != forward.reverse() {
            return Err("comparator is not a total order".to_string());
        }
    }

    return Ok(());
}

impl<T, E, I, F, S> Iterator for RunGenerator<T, E, I, F, S>
where
    T: Send,
    E: Error + Send,
    I: Iterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    S: RunStorage<T>,
{
    /// Input block index and the run built from it.
    type Item = Result<(u64, S::Run), SortError<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.ready.is_empty() && !self.finished {
            let result = match self.thread_pool.clone() {
                Some(thread_pool) => self.generate_parallel(&thread_pool),
                None => self.generate_sequential(),
            };

            if let Err(err) = result {
                self.finished = true;
                self.ready.clear();
                return Some(Err(err));
            }
        }

        if self.ready.is_empty() {
            log::debug!("run generation done ({} runs, {} records)", self.next_block, self.pulled);
        }

        return self.ready.pop_front().map(Ok);
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};
    use std::sync::Arc;

    use rstest::*;

    use super::RunGenerator;
    use crate::run::{MemoryRun, MemoryStorage, Run};
    use crate::sort::SortError;

    fn drain(mut run: MemoryRun<i32>) -> Vec<i32> {
        std::iter::from_fn(|| run.advance().unwrap()).collect()
    }

    fn ok_input(records: Vec<i32>) -> Vec<Result<i32, io::Error>> {
        records.into_iter().map(Ok).collect()
    }

    #[rstest]
    #[case(vec![], 3, vec![])]
    #[case(vec![5, 3, 1, 4, 2], 2, vec![vec![3, 5], vec![1, 4], vec![2]])]
    #[case(vec![5, 3, 1, 4, 2], 5, vec![vec![1, 2, 3, 4, 5]])]
    #[case(vec![5, 3, 1, 4, 2], 9, vec![vec![1, 2, 3, 4, 5]])]
    #[case(vec![2, 1], 1, vec![vec![2], vec![1]])]
    fn test_generate_runs(
        #[case] input: Vec<i32>,
        #[case] chunk_size: usize,
        #[case] expected_runs: Vec<Vec<i32>>,
        #[values(false, true)] parallel: bool,
    ) {
        let mut generator =
            RunGenerator::new(ok_input(input), |a: &i32, b: &i32| a.cmp(b), chunk_size, MemoryStorage).unwrap();
        if parallel {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
            generator = generator.with_thread_pool(Arc::new(pool));
        }

        let runs: Vec<(u64, MemoryRun<i32>)> = generator.map(Result::unwrap).collect();
        let indexes: Vec<u64> = runs.iter().map(|(idx, _)| *idx).collect();
        let actual_runs: Vec<Vec<i32>> = runs.into_iter().map(|(_, run)| drain(run)).collect();

        assert_eq!(indexes, Vec::from_iter(0..expected_runs.len() as u64));
        assert_eq!(actual_runs, expected_runs);
    }

    #[test]
    fn test_zero_chunk_size() {
        let input = std::iter::from_fn(|| -> Option<Result<i32, io::Error>> {
            panic!("input must not be read");
        });

        let result = RunGenerator::new(input, |a: &i32, b: &i32| a.cmp(b), 0, MemoryStorage);
        assert!(matches!(result, Err(SortError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_input_error() {
        let input = vec![Ok(1), Ok(2), Err(io::Error::new(ErrorKind::Other, "test error")), Ok(3)];
        let mut generator = RunGenerator::new(input, |a: &i32, b: &i32| a.cmp(b), 2, MemoryStorage).unwrap();

        assert_eq!(drain(generator.next().unwrap().unwrap().1), vec![1, 2]);
        assert!(matches!(generator.next(), Some(Err(SortError::InputError(_)))));
        assert!(generator.next().is_none());
    }

    /// Input claiming to hold more records than it yields.
    struct ShortInput {
        records: std::vec::IntoIter<i32>,
        claimed: usize,
    }

    impl Iterator for ShortInput {
        type Item = Result<i32, io::Error>;

        fn next(&mut self) -> Option<Self::Item> {
            self.records.next().map(Ok)
        }

        fn size_hint(&self) -> (usize, Option<usize>) {
            (self.claimed, Some(self.claimed))
        }
    }

    #[rstest]
    #[case(vec![1, 2, 3], 5)]
    #[case(vec![1, 2, 3], 2)]
    fn test_source_exhaustion_mismatch(#[case] records: Vec<i32>, #[case] claimed: usize) {
        let input = ShortInput {
            records: records.into_iter(),
            claimed,
        };
        let generator = RunGenerator::new(input, |a: &i32, b: &i32| a.cmp(b), 10, MemoryStorage).unwrap();

        let result: Result<Vec<_>, _> = generator.collect();
        assert!(matches!(
            result,
            Err(SortError::SourceExhaustionMismatch { actual: 3, .. })
        ));
    }

    #[test]
    fn test_non_total_comparator() {
        let generator = RunGenerator::new(
            ok_input(vec![3, 1, 2]),
            |_: &i32, _: &i32| std::cmp::Ordering::Less,
            3,
            MemoryStorage,
        )
        .unwrap();

        let result: Result<Vec<_>, _> = generator.collect();
        assert!(matches!(result, Err(SortError::InvalidConfiguration(_))));
    }
}
