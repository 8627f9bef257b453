use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    ConfigDirNotFound,

    #[error(
        "cluster file not found. Looked in:\n\
        - current directory: cluster.local.yml, cluster.yml, cluster.yaml\n\
        - ~/.config/rigflow/cluster.yml\n\
        Set RIGFLOW_CONFIG to point at a file directly"
    )]
    ClusterFileNotFound,

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
