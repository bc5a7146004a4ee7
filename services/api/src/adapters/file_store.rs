//! services/api/src/adapters/file_store.rs
//!
//! A directory-backed `KeyValueStore`: one file per key. It backs the local chat
//! cache, so transcripts survive a restart of the service.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use study_session_core::ports::{KeyValueStore, PortError, PortResult};

pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Opens the store, creating `dir` when it does not exist yet.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PortResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PortError::Unexpected(format!("Invalid store key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

fn io_error(e: std::io::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> PortResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let path = self.path_for(key)?;
        // Write beside the target and rename so readers never see a partial entry.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(io_error)?;
        fs::rename(&tmp, &path).map_err(io_error)
    }

    fn remove(&self, key: &str) -> PortResult<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}
