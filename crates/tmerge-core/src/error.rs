use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A sidecar could not be read or does not match the expected schema.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to read sidecar {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed sidecar: {0}")]
    Format(#[from] serde_json::Error),
}

/// The structured metadata container of an image could not be rewritten.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("metadata write failed for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    #[error("metadata library panicked while processing {0}")]
    Panicked(PathBuf),
}

/// The external extraction step failed for one archive.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("failed to launch extractor {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("archive not found: {0}")]
    MissingArchive(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Archive-level failure surfaced to the orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
