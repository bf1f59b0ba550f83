//! Generic persisted application state.
//!
//! A single JSON document at `<data>/data.json`, created as `{}` the first
//! time anyone reads it. No schema beyond "valid JSON".

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::storage::write_atomic;

pub const DATA_FILE: &str = "data.json";

/// Handle on the data blob file.
#[derive(Debug, Clone)]
pub struct DataStore {
    path: PathBuf,
}

impl DataStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(DATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the blob, creating an empty object on first access.
    pub fn load_or_init(&self) -> Result<Value> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let empty = Value::Object(serde_json::Map::new());
                self.store(&empty)?;
                debug!("initialized empty data blob at {}", self.path.display());
                Ok(empty)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the blob.
    pub fn store(&self, value: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(value)?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}
