use std::io;

use rand::Rng;
use rstest::*;

use run_merge_sort::{
    sort_by, ExecutionMode, ExternalSorter, ExternalSorterBuilder, MemoryStorage, RmpFileStorage, SortError,
};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
struct Record {
    key: u8,
    position: usize,
}

fn compare_keys(a: &Record, b: &Record) -> std::cmp::Ordering {
    a.key.cmp(&b.key)
}

#[fixture]
fn records() -> Vec<Record> {
    let mut rng = rand::thread_rng();
    (0..300)
        .map(|position| Record {
            key: rng.gen_range(0..16),
            position,
        })
        .collect()
}

fn run_sort(records: &[Record], chunk_size: usize, mode: ExecutionMode) -> Vec<Record> {
    let sorter: ExternalSorter<Record, io::Error> = ExternalSorterBuilder::new()
        .with_chunk_size(chunk_size)
        .with_mode(mode)
        .with_threads_number(4)
        .build()
        .unwrap();

    let input = records.iter().cloned().map(Ok);
    sorter
        .sort_by(input, compare_keys)
        .unwrap()
        .map(Result::unwrap)
        .collect()
}

#[rstest]
fn test_sorted_permutation(
    records: Vec<Record>,
    #[values(1, 2, 3, 299, 300, 301, 1000)] chunk_size: usize,
    #[values(ExecutionMode::Sequential, ExecutionMode::ParallelGenerate, ExecutionMode::Pipelined)]
    mode: ExecutionMode,
) {
    let actual = run_sort(&records, chunk_size, mode);

    assert!(actual.windows(2).all(|pair| pair[0].key <= pair[1].key));

    let mut actual_positions: Vec<usize> = actual.iter().map(|r| r.position).collect();
    actual_positions.sort();
    assert_eq!(actual_positions, Vec::from_iter(0..records.len()));
}

#[rstest]
fn test_chunk_size_does_not_change_output(records: Vec<Record>) {
    let n = records.len();

    // blocks preserve input order of equal records and runs are tie-broken by block index,
    // so the output equals a stable in-memory sort whatever the chunk size
    let mut expected = records.clone();
    expected.sort_by(compare_keys);

    for chunk_size in [1, 3, n / 2, n, n * 2] {
        assert_eq!(run_sort(&records, chunk_size, ExecutionMode::Sequential), expected);
    }
}

#[rstest]
fn test_deterministic_across_executions(records: Vec<Record>) {
    let first = run_sort(&records, 7, ExecutionMode::Sequential);

    for mode in [ExecutionMode::Sequential, ExecutionMode::ParallelGenerate, ExecutionMode::Pipelined] {
        assert_eq!(run_sort(&records, 7, mode), first);
    }
}

#[rstest]
fn test_file_storage_matches_memory(records: Vec<Record>) {
    let storage = RmpFileStorage::new(None, Some(256)).unwrap();
    let sorter: ExternalSorter<Record, io::Error> = ExternalSorterBuilder::with_storage(storage)
        .with_chunk_size(11)
        .with_mode(ExecutionMode::Pipelined)
        .build()
        .unwrap();

    let sorted = sorter.sort_by(records.iter().cloned().map(Ok), compare_keys).unwrap();
    let actual: Vec<Record> = sorted.map(Result::unwrap).collect();

    let sorter = ExternalSorterBuilder::<Record, io::Error, MemoryStorage>::new()
        .with_chunk_size(11)
        .build()
        .unwrap();
    let sorted = sorter.sort_by(records.iter().cloned().map(Ok), compare_keys).unwrap();
    let expected: Vec<Record> = sorted.map(Result::unwrap).collect();

    assert_eq!(actual, expected);
}

#[test]
fn test_abandoned_stream() {
    let input = (0..1000).rev().map(Ok::<i32, io::Error>);
    let mut sorted = sort_by(input, |a: &i32, b: &i32| a.cmp(b), 10).unwrap();

    let head: Vec<i32> = sorted.by_ref().take(3).map(Result::unwrap).collect();
    assert_eq!(head, vec![0, 1, 2]);
    assert_eq!(sorted.stats().records_emitted, 3);
    drop(sorted);
}

#[test]
fn test_zero_chunk_size() {
    let result = sort_by(vec![Ok::<i32, io::Error>(1)], |a: &i32, b: &i32| a.cmp(b), 0);
    assert!(matches!(result, Err(SortError::InvalidConfiguration(_))));
}
