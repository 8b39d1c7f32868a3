//! `run-merge-sort` is a bounded-memory external sort implementation.
//!
//! External sorting handles inputs that don't fit into the working memory. Sorting is achieved in two phases.
//! During the first phase the input is read by blocks of a fixed number of records, every block is sorted in
//! memory and stored as a sorted run. During the second phase all the runs are merged by a binary heap
//! holding one record per run, so the peak memory usage depends on the chunk size and the number of runs,
//! never on the total input size.
//!
//! # Overview
//!
//! * **Lazy output:**
//!   the sorted stream is an iterator, records are merged one at a time as they are pulled and the stream can
//!   be dropped at any moment.
//! * **Deterministic:**
//!   records comparing equal are emitted in the order of the runs they belong to, then in their order within
//!   the run, so the output doesn't depend on the execution mode.
//! * **Storage agnostic:**
//!   runs are spilled to temporary files using `MessagePack` serialization by default. An unbounded
//!   [`MemoryStorage`] is available for small inputs and custom storages can be added by implementing
//!   [`RunStorage`].
//! * **Multithreading support:**
//!   blocks can be sorted concurrently in a thread pool.
//!
//! # Example
//!
//! ```no_run
//! use std::fs;
//! use std::io::{self, prelude::*};
//! use std::path;
//!
//! use run_merge_sort::{ExecutionMode, ExternalSorter, ExternalSorterBuilder};
//!
//! let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
//! let mut output_writer = io::BufWriter::new(fs::File::create("output.txt").unwrap());
//!
//! let sorter: ExternalSorter<String, io::Error> = ExternalSorterBuilder::new()
//!     .with_tmp_dir(path::Path::new("./"))
//!     .with_chunk_size(1_000_000)
//!     .with_mode(ExecutionMode::ParallelGenerate)
//!     .build()
//!     .unwrap();
//!
//! let sorted = sorter.sort(input_reader.lines()).unwrap();
//!
//! for item in sorted.map(Result::unwrap) {
//!     output_writer.write_all(format!("{}\n", item).as_bytes()).unwrap();
//! }
//! output_writer.flush().unwrap();
//! ```

pub mod file;
pub mod generator;
pub mod heap;
pub mod merger;
pub mod run;
pub mod sort;

pub use file::{RmpFileStorage, RmpRun};
pub use generator::RunGenerator;
pub use heap::{HeapEntry, MinHeap};
pub use merger::{MergeStats, RunMerger};
pub use run::{MemoryRun, MemoryStorage, Run, RunError, RunStorage, TempRunStorage};
pub use sort::{sort_by, ExecutionMode, ExternalSorter, ExternalSorterBuilder, SortError, SortedStream};
