use std::path::PathBuf;

use strata::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("could not determine data directory")]
    NoDataDir,

    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse runner config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("control loop task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
