//! Record storage for the position ledger

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use stepclock_core::{StepClockError, StepClockResult};

/// Storage holding one short text record
pub trait RecordStore {
    /// Read the record; `Ok(None)` when it does not exist yet
    fn read(&self) -> StepClockResult<Option<String>>;

    /// Replace the record
    fn write(&mut self, record: &str) -> StepClockResult<()>;
}

/// Record kept in a single file
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RecordStore for FileStore {
    fn read(&self) -> StepClockResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StepClockError::Storage(format!(
                "read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write(&mut self, record: &str) -> StepClockResult<()> {
        // Write aside and rename so a power cut never leaves a torn record
        let tmp = self.temp_path();
        fs::write(&tmp, record)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| StepClockError::Storage(format!("write {}: {}", self.path.display(), e)))
    }
}
