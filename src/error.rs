use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoverageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid profile line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("Profile is missing its mode line")]
    MissingMode,

    #[error(
        "Inconsistent statement count for block {start_line}.{start_col},{end_line}.{end_col}: \
         changed from {previous} to {current}"
    )]
    Consistency {
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
        previous: u64,
        current: u64,
    },

    #[error("Package lookup unavailable: {0}")]
    ResolverUnavailable(String),

    #[error("source not found at {}: {source}", .path.display())]
    SourceMissing {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CoverageError {
    pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
        CoverageError::Format {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoverageError>;
