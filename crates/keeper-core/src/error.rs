use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("not initialized: run 'keeper init'")]
    NotInitialized,

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("invalid channel tag '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidTag(String),

    #[error("manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KeeperError>;
