use std::path::PathBuf;

use gru_core::GruError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Gru(#[from] GruError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid sweep file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("sweep file has no [[cases]]")]
    EmptySweep,
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;
