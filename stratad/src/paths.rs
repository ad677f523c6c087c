//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RunnerError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    /// Use `override_dir` when given, else the platform data directory.
    pub fn new(override_dir: Option<&Path>) -> Result<Self, RunnerError> {
        let data_dir = match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => Self::default_data_dir()?,
        };

        // Ensure directory exists
        fs::create_dir_all(&data_dir).map_err(|source| RunnerError::Io {
            path: data_dir.clone(),
            source,
        })?;

        Ok(Self { data_dir })
    }

    fn default_data_dir() -> Result<PathBuf, RunnerError> {
        let base = dirs::data_dir().ok_or(RunnerError::NoDataDir)?;
        Ok(base.join("strata"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn checkpoint_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.ckpt"))
    }
}
