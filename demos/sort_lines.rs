use std::env;
use std::io::{self, prelude::*};

use env_logger;
use log;

use run_merge_sort::{ExecutionMode, ExternalSorter, ExternalSorterBuilder};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let mode: ExecutionMode = env::args()
        .nth(1)
        .map(|arg| arg.parse().unwrap())
        .unwrap_or_default();

    let sorter: ExternalSorter<String, io::Error> = ExternalSorterBuilder::new()
        .with_chunk_size(10_000)
        .with_mode(mode)
        .build()
        .unwrap();

    let mut sorted = sorter.sort(io::stdin().lock().lines()).unwrap();

    let mut output_writer = io::BufWriter::new(io::stdout().lock());
    for line in sorted.by_ref().map(Result::unwrap) {
        output_writer.write_all(format!("{}\n", line).as_bytes()).unwrap();
    }
    output_writer.flush().unwrap();

    for warning in sorted.release_warnings() {
        log::warn!("temporary run file not removed: {}", warning);
    }
}
