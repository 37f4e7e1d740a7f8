use std::{io, path::PathBuf};

use roadseg_util::ImageError;
use thiserror::Error;

/// Errors raised while encoding or archiving a submission.
#[derive(Error, Debug)]
pub enum SubmissionError {
    /// The mask file name carries no digits to take the image number from.
    #[error("No image number in file name: {}", .path.display())]
    MissingImageNumber { path: PathBuf },

    /// The digit run does not fit an image number.
    #[error("Image number '{digits}' in {} is out of range", .path.display())]
    InvalidImageNumber { path: PathBuf, digits: String },

    /// A directory that must exist is missing.
    #[error("Directory not found: {}", .path.display())]
    MissingDirectory { path: PathBuf },

    /// Reading or writing a file failed.
    #[error("I/O error at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Walking a directory tree failed.
    #[error("Failed to walk directory {}", .path.display())]
    DirectoryWalk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Decoding a mask failed.
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// A specialized `Result` type for submission operations.
pub type SubmissionResult<T> = Result<T, SubmissionError>;

impl SubmissionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
