//! JSON snapshot checkpoints for the orchestration layer.
//!
//! Cycles can stash small summaries (or whole fetched record sets) under
//! a named file and pick them up on the next start. The core never sees
//! these files; they are purely an orchestration convenience.

use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors while reading or writing a checkpoint file.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("checkpoint serialization error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn checkpoint_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

/// Load a named checkpoint; `Ok(None)` when none was ever saved.
pub fn load<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Option<T>, CheckpointError> {
    let path = checkpoint_path(dir, name);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CheckpointError::Io { path, source }),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| CheckpointError::Json { path, source })
}

/// Save a named checkpoint, creating the directory when needed.
pub fn save<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), CheckpointError> {
    std::fs::create_dir_all(dir).map_err(|source| CheckpointError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = checkpoint_path(dir, name);
    let text = serde_json::to_string_pretty(value).map_err(|source| CheckpointError::Json {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, text).map_err(|source| CheckpointError::Io { path, source })
}
