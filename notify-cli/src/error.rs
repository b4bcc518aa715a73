use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Configuration could not be serialized: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No config or data directory could be determined; pass --config and --session-file")]
    NoHomeDirectory,

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
