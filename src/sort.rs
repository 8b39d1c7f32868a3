//! External sorter.

use log;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::file::RmpFileStorage;
use crate::generator::RunGenerator;
use crate::merger::{MergeStats, RunMerger};
use crate::run::{RunError, RunStorage, TempRunStorage};

/// Number of records per run used if not set explicitly.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Sorting error.
#[derive(Debug)]
pub enum SortError<I: Error> {
    /// Sorter configuration error: non-positive chunk size, zero threads number or a compare function
    /// that is not a total order.
    InvalidConfiguration(String),
    /// Input stream yielded a number of records out of the bounds it reported.
    SourceExhaustionMismatch {
        lower: usize,
        upper: Option<usize>,
        actual: usize,
    },
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Data serialization error.
    SerializationError(rmp_serde::encode::Error),
    /// Data deserialization error.
    DeserializationError(rmp_serde::decode::Error),
    /// Input data stream error
    InputError(I),
}

impl<I> Error for SortError<I>
where
    I: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::InvalidConfiguration(_) => return None,
            SortError::SourceExhaustionMismatch { .. } => return None,
            SortError::TempDir(err) => err,
            SortError::ThreadPoolBuildError(err) => err,
            SortError::IO(err) => err,
            SortError::SerializationError(err) => err,
            SortError::DeserializationError(err) => err,
            SortError::InputError(err) => err,
        })
    }
}

impl<I: Error> Display for SortError<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidConfiguration(msg) => write!(f, "invalid sorter configuration: {}", msg),
            SortError::SourceExhaustionMismatch { lower, upper, actual } => match upper {
                Some(upper) => write!(
                    f,
                    "input stream yielded {} records, expected from {} to {}",
                    actual, lower, upper
                ),
                None => write!(f, "input stream yielded {} records, expected at least {}", actual, lower),
            },
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::SerializationError(err) => write!(f, "data serialization error: {}", err),
            SortError::DeserializationError(err) => write!(f, "data deserialization error: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
        }
    }
}

impl<I: Error> From<RunError> for SortError<I> {
    fn from(err: RunError) -> Self {
        match err {
            RunError::IO(err) => SortError::IO(err),
            RunError::SerializationError(err) => SortError::SerializationError(err),
            RunError::DeserializationError(err) => SortError::DeserializationError(err),
        }
    }
}

/// Sorting execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Runs are generated in the calling thread before [`ExternalSorter::sort_by`] returns.
    Sequential,
    /// Blocks are sorted concurrently in a thread pool before [`ExternalSorter::sort_by`] returns.
    ParallelGenerate,
    /// Runs are generated on the first pull of the sorted stream and registered in the merger as soon as
    /// they are built.
    Pipelined,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(ExecutionMode::Sequential),
            "parallel-generate" => Ok(ExecutionMode::ParallelGenerate),
            "pipelined" => Ok(ExecutionMode::Pipelined),
            _ => Err(format!("unknown execution mode: {}", s)),
        }
    }
}

/// Run storage an [`ExternalSorter`] is built with.
#[derive(Clone)]
enum StorageSource<S> {
    /// Storage provided by the caller.
    Given(S),
    /// Storage created in a temporary directory when the sorter is built.
    Temporary(fn(Option<&Path>, Option<usize>) -> Result<S, io::Error>),
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
///
/// By default runs are spilled to MessagePack encoded files in a temporary directory, so only a chunk
/// of records plus one head per run is held in memory.
#[derive(Clone)]
pub struct ExternalSorterBuilder<T, E, S = RmpFileStorage>
where
    T: Send,
    E: Error,
    S: RunStorage<T>,
{
    /// Maximum number of records in a run.
    chunk_size: Option<usize>,
    /// Execution mode.
    mode: ExecutionMode,
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Run storage.
    storage: StorageSource<S>,

    /// Input item type.
    item_type: PhantomData<T>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<T, E, S> ExternalSorterBuilder<T, E, S>
where
    T: Send,
    E: Error + Send,
    S: RunStorage<T> + TempRunStorage,
{
    /// Creates an instance of a builder with default parameters.
    /// The run storage is created in a temporary directory by [`build`](ExternalSorterBuilder::build).
    pub fn new() -> Self {
        ExternalSorterBuilder::from_source(StorageSource::Temporary(S::create))
    }
}

impl<T, E, S> ExternalSorterBuilder<T, E, S>
where
    T: Send,
    E: Error + Send,
    S: RunStorage<T>,
{
    /// Creates an instance of a builder with default parameters storing runs in `storage`.
    /// Temporary directory settings are ignored in that case.
    pub fn with_storage(storage: S) -> Self {
        ExternalSorterBuilder::from_source(StorageSource::Given(storage))
    }

    fn from_source(storage: StorageSource<S>) -> Self {
        ExternalSorterBuilder {
            chunk_size: None,
            mode: ExecutionMode::default(),
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            storage,
            item_type: PhantomData,
            input_error_type: PhantomData,
        }
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<T, E, S>, SortError<E>> {
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        validate_config(chunk_size, self.threads_number)?;

        let storage = match self.storage {
            StorageSource::Given(storage) => storage,
            StorageSource::Temporary(create) => {
                create(self.tmp_dir.as_deref(), self.rw_buf_size).map_err(SortError::TempDir)?
            }
        };

        ExternalSorter::new(chunk_size, self.mode, self.threads_number, storage)
    }

    /// Sets maximum number of records in a run.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> ExternalSorterBuilder<T, E, S> {
        self.chunk_size = Some(chunk_size);
        return self;
    }

    /// Sets execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> ExternalSorterBuilder<T, E, S> {
        self.mode = mode;
        return self;
    }

    /// Sets number of threads to be used to sort data in parallel.
    /// Used in [`ExecutionMode::ParallelGenerate`] mode only.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<T, E, S> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T, E, S> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<T, E, S> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<T, E, S> Default for ExternalSorterBuilder<T, E, S>
where
    T: Send,
    E: Error + Send,
    S: RunStorage<T> + TempRunStorage,
{
    fn default() -> Self {
        Self::new()
    }
}

fn validate_config<E: Error>(chunk_size: usize, threads_number: Option<usize>) -> Result<(), SortError<E>> {
    if chunk_size == 0 {
        return Err(SortError::InvalidConfiguration("chunk size must be positive".to_string()));
    }
    if threads_number == Some(0) {
        return Err(SortError::InvalidConfiguration("threads number must be positive".to_string()));
    }

    return Ok(());
}

/// External sorter.
pub struct ExternalSorter<T, E, S = RmpFileStorage>
where
    T: Send,
    E: Error,
    S: RunStorage<T>,
{
    /// Maximum number of records in a run.
    chunk_size: usize,
    /// Execution mode.
    mode: ExecutionMode,
    /// Sorting thread pool, [`ExecutionMode::ParallelGenerate`] mode only.
    thread_pool: Option<Arc<rayon::ThreadPool>>,
    /// Run storage.
    storage: S,

    /// Input item type.
    item_type: PhantomData<T>,
    /// Input error type.
    input_error_type: PhantomData<E>,
}

impl<T, E, S> ExternalSorter<T, E, S>
where
    T: Send,
    E: Error + Send,
    S: RunStorage<T>,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `chunk_size` - Maximum number of records in a run. Must be positive.
    /// * `mode` - Execution mode.
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `storage` - Storage runs are materialized in.
    pub fn new(
        chunk_size: usize,
        mode: ExecutionMode,
        threads_number: Option<usize>,
        storage: S,
    ) -> Result<Self, SortError<E>> {
        validate_config(chunk_size, threads_number)?;

        let thread_pool = match mode {
            ExecutionMode::ParallelGenerate => Some(Arc::new(Self::init_thread_pool(threads_number)?)),
            _ => None,
        };

        log::info!("initializing sorter (chunk size: {}, mode: {:?})", chunk_size, mode);

        return Ok(ExternalSorter {
            chunk_size,
            mode,
            thread_pool,
            storage,
            item_type: PhantomData,
            input_error_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError<E>> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Returns the maximum number of records in a run.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Sorts data from the input.
    /// Returns an iterator that can be used to get sorted data stream.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    pub fn sort<I>(
        &self,
        input: I,
    ) -> Result<SortedStream<T, E, I::IntoIter, impl Fn(&T, &T) -> Ordering + Sync + Send + Copy, S>, SortError<E>>
    where
        T: Ord,
        I: IntoIterator<Item = Result<T, E>>,
    {
        self.sort_by(input, T::cmp)
    }

    /// Sorts data from the input using a custom compare function.
    /// Returns an iterator that can be used to get sorted data stream.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    /// * `compare` - Function be be used to compare items
    pub fn sort_by<I, F>(&self, input: I, compare: F) -> Result<SortedStream<T, E, I::IntoIter, F, S>, SortError<E>>
    where
        I: IntoIterator<Item = Result<T, E>>,
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        let mut generator = RunGenerator::new(input, compare, self.chunk_size, self.storage.clone())?;
        if let Some(thread_pool) = &self.thread_pool {
            generator = generator.with_thread_pool(thread_pool.clone());
        }

        let mut stream = SortedStream {
            merger: RunMerger::new(compare),
            pending: Some(generator),
        };

        if self.mode != ExecutionMode::Pipelined {
            stream.register_pending()?;
            log::debug!("external sort preparation done");
        }

        return Ok(stream);
    }
}

/// Sorts data from the input by runs of `chunk_size` records spilled to a temporary directory.
/// Returns an iterator that can be used to get sorted data stream.
///
/// # Arguments
/// * `input` - Input stream data to be fetched from
/// * `compare` - Function be be used to compare items
/// * `chunk_size` - Maximum number of records in a run
pub fn sort_by<T, E, I, F>(
    input: I,
    compare: F,
    chunk_size: usize,
) -> Result<SortedStream<T, E, I::IntoIter, F, RmpFileStorage>, SortError<E>>
where
    T: Serialize + DeserializeOwned + Send,
    E: Error + Send,
    I: IntoIterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
{
    let sorter: ExternalSorter<T, E, RmpFileStorage> =
        ExternalSorterBuilder::new().with_chunk_size(chunk_size).build()?;
    sorter.sort_by(input, compare)
}

/// Sorted data stream.
///
/// Records are produced on demand; the stream can be dropped at any moment releasing all the remaining runs.
/// A mid-stream error is returned once after which the stream yields nothing.
pub struct SortedStream<T, E, I, F, S>
where
    E: Error,
    I: Iterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering,
    S: RunStorage<T>,
{
    merger: RunMerger<T, S::Run, F>,
    /// Runs generator not drained yet.
    pending: Option<RunGenerator<T, E, I, F, S>>,
}

impl<T, E, I, F, S> SortedStream<T, E, I, F, S>
where
    T: Send,
    E: Error + Send,
    I: Iterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    S: RunStorage<T>,
{
    /// Returns merge statistics.
    pub fn stats(&self) -> MergeStats {
        self.merger.stats()
    }

    /// Returns the errors that occurred while releasing exhausted runs.
    /// They don't affect the emitted records.
    pub fn release_warnings(&self) -> &[RunError] {
        self.merger.release_warnings()
    }

    fn register_pending(&mut self) -> Result<(), SortError<E>> {
        let generator = match self.pending.take() {
            Some(generator) => generator,
            None => return Ok(()),
        };

        for run in generator {
            let (idx, run) = run?;
            self.merger.register(run, idx)?;
        }

        return Ok(());
    }
}

impl<T, E, I, F, S> Iterator for SortedStream<T, E, I, F, S>
where
    T: Send,
    E: Error + Send,
    I: Iterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    S: RunStorage<T>,
{
    type Item = Result<T, SortError<E>>;

    /// Returns the next record in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.register_pending() {
            self.merger.abandon();
            return Some(Err(err));
        }

        self.merger.next().map(|result| result.map_err(SortError::from))
    }
}
