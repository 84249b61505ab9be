use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum CoredeckError {
    #[error("failed to create cache directory {}: {source}", .path.display())]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no free port among candidates {0:?}")]
    NoFreePort(Vec<u16>),

    #[error("core exited with {status}. Check logs at {} for details.", .log_path.display())]
    CoreExited { status: String, log_path: PathBuf },

    #[error("invalid engine state: {0}")]
    InvalidState(&'static str),

    #[error("failed to signal core process: {0}")]
    Signal(String),

    #[error("engine API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoredeckError>;
