use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Missing data: {0}")]
    MissingData(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Failed to parse {}:{line}: {source}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ExperimentError {
    /// Missing documents or an ambiguous gold marker.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            ExperimentError::MissingData(_) | ExperimentError::InvariantViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExperimentError>;
