use std::io;
use std::path::{Path, PathBuf};

/// The benchmark binary could not be started at all.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("benchmark binary not found: {}", .binary.display())]
    NotFound { binary: PathBuf },

    #[error("benchmark binary is not executable: {}", .binary.display())]
    PermissionDenied { binary: PathBuf },

    #[error("failed to start benchmark binary '{}'", .binary.display())]
    Io {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    pub fn from_io(binary: &Path, source: io::Error) -> Self {
        let binary = binary.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => SpawnError::NotFound { binary },
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied { binary },
            _ => SpawnError::Io { binary, source },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse sweep plan")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid sweep plan: {0}")]
    Invalid(String),
}
