//! File backed runs.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;
use std::sync::Arc;

use log;
use tempfile;

use crate::run::{Run, RunError, RunStorage, TempRunStorage};

/// Storage spilling runs to temporary files.
/// It uses MessagePack as a record serialization format.
/// For more information see https://msgpack.org/.
///
/// Every run gets its own file inside a temporary directory that is removed once the storage and
/// all the runs created by it are dropped.
#[derive(Clone)]
pub struct RmpFileStorage {
    dir: Arc<tempfile::TempDir>,
    rw_buf_size: Option<usize>,
}

impl RmpFileStorage {
    /// Creates a new file storage.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run file read/write buffer size.
    pub fn new(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> Result<Self, io::Error> {
        let dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(RmpFileStorage {
            dir: Arc::new(dir),
            rw_buf_size,
        });
    }

    /// Returns the temporary directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl TempRunStorage for RmpFileStorage {
    fn create(tmp_path: Option<&Path>, rw_buf_size: Option<usize>) -> Result<Self, io::Error> {
        RmpFileStorage::new(tmp_path, rw_buf_size)
    }
}

impl<T> RunStorage<T> for RmpFileStorage
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned + Send,
{
    type Run = RmpRun<T>;

    fn store(&self, block: Vec<T>) -> Result<Self::Run, RunError> {
        let tmp_file = tempfile::NamedTempFile::new_in(self.dir.path())?;

        let mut run_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file.reopen()?),
            None => io::BufWriter::new(tmp_file.reopen()?),
        };

        for record in block.iter() {
            rmp_serde::encode::write(&mut run_writer, record).map_err(RunError::SerializationError)?;
        }
        run_writer.flush()?;
        drop(run_writer);

        let read_file = tmp_file.reopen()?;
        let file_len = read_file.metadata()?.len();
        let run_reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, read_file),
            None => io::BufReader::new(read_file),
        };

        log::debug!("run of {} records spilled to {}", block.len(), tmp_file.path().display());

        return RmpRun::open(tmp_file, run_reader.take(file_len));
    }
}

/// Run read back from a MessagePack encoded temporary file.
/// Only the record under the cursor is kept in memory.
pub struct RmpRun<T> {
    file: tempfile::NamedTempFile,
    reader: io::Take<io::BufReader<fs::File>>,
    head: Option<T>,
    // read failure of the record following the head, reported by the next advance
    pending_error: Option<RunError>,
}

impl<T> RmpRun<T>
where
    T: serde::de::DeserializeOwned,
{
    fn open(file: tempfile::NamedTempFile, reader: io::Take<io::BufReader<fs::File>>) -> Result<Self, RunError> {
        let mut run = RmpRun {
            file,
            reader,
            head: None,
            pending_error: None,
        };
        run.head = run.read_next()?;

        return Ok(run);
    }

    fn read_next(&mut self) -> Result<Option<T>, RunError> {
        if self.reader.limit() == 0 {
            Ok(None)
        } else {
            rmp_serde::decode::from_read(&mut self.reader)
                .map(Some)
                .map_err(RunError::DeserializationError)
        }
    }
}

impl<T> Run<T> for RmpRun<T>
where
    T: serde::de::DeserializeOwned,
{
    fn peek(&self) -> Option<&T> {
        self.head.as_ref()
    }

    fn advance(&mut self) -> Result<Option<T>, RunError> {
        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        let head = match self.head.take() {
            Some(head) => head,
            None => return Ok(None),
        };
        match self.read_next() {
            Ok(next) => self.head = next,
            Err(err) => self.pending_error = Some(err),
        }

        return Ok(Some(head));
    }

    fn is_exhausted(&self) -> bool {
        self.head.is_none() && self.pending_error.is_none()
    }

    fn release(self) -> Result<(), RunError> {
        let RmpRun { file, reader, .. } = self;
        drop(reader);
        file.close()?;

        return Ok(());
    }
}
