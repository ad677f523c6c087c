use std::path::{Path, PathBuf};

use crate::hierarchy::level_widths;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_NAME: &str = "test_brain";
pub const DEFAULT_BACKUP_INTERVAL: u64 = 100_000;
pub const DEFAULT_SEQUENCES_PER_ELEMENT: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "serde")]
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Construction-time settings for a [`Brain`](crate::brain::Brain).
///
/// `num_actions` is the number of actions the world understands. The brain
/// adds one reserved "do nothing" action on top of it internally.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BrainConfig {
    pub name: String,
    pub num_sensors: usize,
    pub num_actions: usize,

    // Checkpoint every this many timesteps (exact multiples, counted from 1).
    pub backup_interval: u64,

    // Where checkpoints and performance reports go.
    pub log_dir: PathBuf,
    // Overrides `log_dir/{name}.ckpt`.
    pub checkpoint_path: Option<PathBuf>,

    pub num_levels: usize,
    // Each level has this many sequences per element it consumes.
    pub sequences_per_element: usize,

    // If set, makes exploration reproducible.
    pub seed: Option<u64>,

    // Baseline mode: ignore level goals and act at random.
    pub random_actions: bool,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            num_sensors: 1,
            num_actions: 1,
            backup_interval: DEFAULT_BACKUP_INTERVAL,
            log_dir: PathBuf::from("log"),
            checkpoint_path: None,
            num_levels: 1,
            sequences_per_element: DEFAULT_SEQUENCES_PER_ELEMENT,
            seed: None,
            random_actions: false,
        }
    }
}

impl BrainConfig {
    pub fn new(num_sensors: usize, num_actions: usize) -> Self {
        Self {
            num_sensors,
            num_actions,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels;
        self
    }

    pub fn with_sequences_per_element(mut self, n: usize) -> Self {
        self.sequences_per_element = n;
        self
    }

    pub fn with_backup_interval(mut self, interval: u64) -> Self {
        self.backup_interval = interval;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_random_actions(mut self, enabled: bool) -> Self {
        self.random_actions = enabled;
        self
    }

    /// Primary checkpoint location. The backup copy lives next to it.
    pub fn resolved_checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| self.log_dir.join(format!("{}.ckpt", self.name)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_sensors == 0 {
            return Err(ConfigError::Invalid("num_sensors must be at least 1"));
        }
        if self.num_levels == 0 {
            return Err(ConfigError::Invalid("num_levels must be at least 1"));
        }
        if self.sequences_per_element == 0 {
            return Err(ConfigError::Invalid(
                "sequences_per_element must be at least 1",
            ));
        }
        if self.backup_interval == 0 {
            return Err(ConfigError::Invalid("backup_interval must be at least 1"));
        }
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("name must not be empty"));
        }
        // The reserved action is added on top of the configured ones.
        let widths = self
            .num_actions
            .checked_add(1)
            .and_then(|num_actions| {
                level_widths(
                    self.num_sensors,
                    num_actions,
                    self.num_levels,
                    self.sequences_per_element,
                )
            });
        if widths.is_none() {
            return Err(ConfigError::Invalid(
                "level stack too wide: lower num_levels or sequences_per_element",
            ));
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: BrainConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[cfg(feature = "serde")]
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}
