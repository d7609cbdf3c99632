//! State the stub persists between invocations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File holding the stub's rows, created next to the configuration document.
pub const STATE_FILE: &str = "stub-state.json";

/// Rows stored by `INSERT` plus whether the search index was built.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubState {
    /// Stored rows, in insertion order.
    pub rows: Vec<String>,
    /// Whether `search-index update` ran since the last clear.
    pub indexed: bool,
}

/// Failures reading or writing the state file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The state file exists but could not be read or replaced.
    #[error("state file '{path}': {source}")]
    Io {
        /// State file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The state file is not valid JSON.
    #[error("invalid state file: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Handle on one worker's state file.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Store living in the directory of `config_path`.
    #[must_use]
    pub fn beside(config_path: &Path) -> Self {
        let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        Self {
            path: dir.join(STATE_FILE),
        }
    }

    /// Current state; a missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be read or decoded.
    pub fn load(&self) -> Result<StubState, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(StubState::default()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Applies `change` and replaces the file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading or writing fails.
    pub fn update(&self, change: impl FnOnce(&mut StubState)) -> Result<(), StoreError> {
        let mut state = self.load()?;
        change(&mut state);
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(&state)?).map_err(|source| self.io_error(source))?;
        fs::rename(&staging, &self.path).map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    fn missing_file_reads_as_empty_state() {
        let dir = TempDir::new().expect("temp dir");
        let store = Store::beside(&dir.path().join("config.toml"));
        assert_eq!(store.load().expect("load"), StubState::default());
    }

    #[rstest]
    fn updates_are_visible_to_later_loads() {
        let dir = TempDir::new().expect("temp dir");
        let store = Store::beside(&dir.path().join("config.toml"));
        store
            .update(|state| state.rows.push("lecture".to_owned()))
            .expect("insert");
        store.update(|state| state.indexed = true).expect("index");
        let state = store.load().expect("load");
        assert_eq!(state.rows, ["lecture"]);
        assert!(state.indexed);
        assert!(dir.path().join(STATE_FILE).exists());
    }
}
