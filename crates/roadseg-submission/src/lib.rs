//! # roadseg-submission
//!
//! Turns discretized road masks into the competition submission format and
//! archives complete submission runs.

pub mod encoder;
pub mod error;
pub mod log;

pub use encoder::{
    directory_to_submission, mask_to_submission_rows, masks_to_submission, parse_image_number,
    SubmissionOrder, SubmissionRow, BLOCK_SIZE, CSV_HEADER,
};
pub use error::{SubmissionError, SubmissionResult};
pub use log::{write_config_file, SubmissionLog, RESULT_DIRECTORIES};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    /// Fresh scratch directory below the system temp dir.
    pub fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "roadseg-submission-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
