//! Sorted runs and run storages.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::Path;

/// Run storage error.
#[derive(Debug)]
pub enum RunError {
    /// Common I/O error.
    IO(io::Error),
    /// Record serialization error.
    SerializationError(rmp_serde::encode::Error),
    /// Record deserialization error.
    DeserializationError(rmp_serde::decode::Error),
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            RunError::IO(err) => err,
            RunError::SerializationError(err) => err,
            RunError::DeserializationError(err) => err,
        })
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            RunError::IO(err) => write!(f, "run I/O operation failed: {}", err),
            RunError::SerializationError(err) => write!(f, "run record serialization error: {}", err),
            RunError::DeserializationError(err) => write!(f, "run record deserialization error: {}", err),
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        RunError::IO(err)
    }
}

/// Sorted run interface.
///
/// A run is a finite forward-only sequence of records sorted at creation time. The cursor only moves
/// forward and once a run is exhausted it stays exhausted.
///
/// [`RunMerger`](crate::RunMerger) only calls [`advance`](Run::advance) and [`release`](Run::release): the
/// record taken by `advance` is moved into the merge heap, so the heap entry plays the role of the peeked
/// head and `Ok(None)` is the exhaustion signal. [`peek`](Run::peek) and [`is_exhausted`](Run::is_exhausted)
/// serve callers that read runs directly.
pub trait Run<T> {
    /// Returns the record under the cursor without moving it.
    fn peek(&self) -> Option<&T>;

    /// Returns the record under the cursor and moves the cursor forward.
    /// Returns `Ok(None)` when the run is exhausted.
    fn advance(&mut self) -> Result<Option<T>, RunError>;

    /// Checks if all the records have been consumed.
    fn is_exhausted(&self) -> bool;

    /// Releases resources held by the run.
    fn release(self) -> Result<(), RunError>
    where
        Self: Sized;
}

/// Run storage interface. Materializes sorted blocks as runs.
pub trait RunStorage<T>: Clone + Send + Sync {
    type Run: Run<T> + Send;

    /// Stores a sorted block. Records must already be sorted, the storage never re-sorts them.
    fn store(&self, block: Vec<T>) -> Result<Self::Run, RunError>;
}

/// Run storage that can be created by the sorter on its own.
pub trait TempRunStorage: Sized {
    /// Creates a storage.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run file read/write buffer size.
    fn create(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> Result<Self, io::Error>;
}

/// Run kept in memory.
#[derive(Debug)]
pub struct MemoryRun<T> {
    records: std::vec::IntoIter<T>,
}

impl<T> MemoryRun<T> {
    /// Creates a run from an already sorted block.
    pub fn from_sorted_block(block: Vec<T>) -> Self {
        MemoryRun {
            records: block.into_iter(),
        }
    }

    /// Returns the number of records not yet consumed.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl<T> Run<T> for MemoryRun<T> {
    fn peek(&self) -> Option<&T> {
        self.records.as_slice().first()
    }

    fn advance(&mut self) -> Result<Option<T>, RunError> {
        Ok(self.records.next())
    }

    fn is_exhausted(&self) -> bool {
        self.records.as_slice().is_empty()
    }

    fn release(self) -> Result<(), RunError> {
        Ok(())
    }
}

/// Storage keeping runs in memory.
///
/// Every stored block stays in memory until its run is exhausted, so the memory usage is proportional to the
/// whole input. Meant for inputs known to fit in memory and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorage;

impl TempRunStorage for MemoryStorage {
    fn create(_: Option<&Path>, _: Option<usize>) -> Result<Self, io::Error> {
        Ok(MemoryStorage)
    }
}

impl<T: Send> RunStorage<T> for MemoryStorage {
    type Run = MemoryRun<T>;

    fn store(&self, block: Vec<T>) -> Result<Self::Run, RunError> {
        Ok(MemoryRun::from_sorted_block(block))
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::{MemoryRun, MemoryStorage, Run, RunStorage};

    #[test]
    fn test_memory_run_cursor() {
        let mut run = MemoryRun::from_sorted_block(vec![1, 2, 3]);

        assert_eq!(run.peek(), Some(&1));
        assert_eq!(run.peek(), Some(&1));
        assert_eq!(run.advance().unwrap(), Some(1));
        assert_eq!(run.peek(), Some(&2));
        assert_eq!(run.remaining(), 2);
        assert_eq!(run.is_exhausted(), false);

        assert_eq!(run.advance().unwrap(), Some(2));
        assert_eq!(run.advance().unwrap(), Some(3));
        assert_eq!(run.is_exhausted(), true);
        assert_eq!(run.peek(), None);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![42])]
    fn test_memory_run_exhaustion_is_permanent(#[case] block: Vec<i32>) {
        let mut run = MemoryStorage.store(block.clone()).unwrap();

        let drained: Vec<i32> = std::iter::from_fn(|| run.advance().unwrap()).collect();
        assert_eq!(drained, block);

        for _ in 0..3 {
            assert_eq!(run.is_exhausted(), true);
            assert_eq!(run.advance().unwrap(), None);
        }
        run.release().unwrap();
    }
}
