//! Archiving of a complete submission run.
//!
//! A logged submission is a self-contained directory holding the model
//! weights, all prediction directories, the training logs (if the run
//! trained), the run configuration and the resulting CSV files, so that an
//! experiment can be inspected or resubmitted later.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use walkdir::WalkDir;

use crate::{
    encoder::{directory_to_submission, SubmissionOrder},
    error::{SubmissionError, SubmissionResult},
};

/// Prediction directories copied from `<test path>/results`.
pub const RESULT_DIRECTORIES: [&str; 4] =
    ["discrete", "continuous", "discrete_post", "continuous_post"];

/// Everything needed to archive one run.
#[derive(Debug, Clone)]
pub struct SubmissionLog {
    /// Directory that receives one subdirectory per logged submission.
    pub out_root: PathBuf,
    /// Name of the subdirectory for this run.
    pub identifier: String,
    /// Trained model weights.
    pub model_path: PathBuf,
    /// Model name; the weights are stored as `<model_name>.<ext>`.
    pub model_name: String,
    /// Directory holding the [`RESULT_DIRECTORIES`].
    pub results_root: PathBuf,
    /// Training log directory, present when the run trained a model.
    pub training_logs: Option<PathBuf>,
    /// Run configuration, written to `config.cfg`.
    pub config_entries: Vec<(String, String)>,
    /// Foreground threshold for the CSV encoder.
    pub threshold: f32,
    pub order: SubmissionOrder,
}

impl SubmissionLog {
    /// Directory this run is archived into.
    pub fn submission_path(&self) -> PathBuf {
        self.out_root.join(&self.identifier)
    }

    /// Archive the run and write `submission.csv` and `submission_post.csv`.
    ///
    /// Returns the submission directory.
    ///
    /// # Errors
    ///
    /// Fails if a source file or directory is missing or any copy fails.
    pub fn write(&self) -> SubmissionResult<PathBuf> {
        let submission_path = self.submission_path();
        fs::create_dir_all(&submission_path)
            .map_err(|e| SubmissionError::io(&submission_path, e))?;
        tracing::info!(path = %submission_path.display(), "logging submission");

        let weights_name = match self.model_path.extension() {
            Some(ext) => format!("{}.{}", self.model_name, ext.to_string_lossy()),
            None => self.model_name.clone(),
        };
        let weights_target = submission_path.join(weights_name);
        fs::copy(&self.model_path, &weights_target)
            .map_err(|e| SubmissionError::io(&self.model_path, e))?;

        for name in RESULT_DIRECTORIES {
            copy_dir(&self.results_root.join(name), &submission_path.join(name))?;
        }

        if let Some(logs) = &self.training_logs {
            copy_dir(logs, &submission_path.join("training_logs"))?;
        }

        write_config_file(&self.config_entries, &submission_path.join("config.cfg"))?;

        directory_to_submission(
            &submission_path.join("submission.csv"),
            &submission_path.join("discrete"),
            self.threshold,
            self.order,
        )?;
        directory_to_submission(
            &submission_path.join("submission_post.csv"),
            &submission_path.join("discrete_post"),
            self.threshold,
            self.order,
        )?;

        Ok(submission_path)
    }
}

/// Write `key = value` lines sorted by key, with `_` in keys shown as `-`.
pub fn write_config_file(entries: &[(String, String)], path: &Path) -> SubmissionResult<()> {
    let mut sorted: Vec<&(String, String)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let file = File::create(path).map_err(|e| SubmissionError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for (key, value) in sorted {
        writeln!(writer, "{} = {}", key.replace('_', "-"), value)
            .map_err(|e| SubmissionError::io(path, e))?;
    }
    writer.flush().map_err(|e| SubmissionError::io(path, e))
}

/// Recursively copy `src` into `dst`.
fn copy_dir(src: &Path, dst: &Path) -> SubmissionResult<()> {
    if !src.is_dir() {
        return Err(SubmissionError::MissingDirectory {
            path: src.to_path_buf(),
        });
    }

    let mut copied = 0usize;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|source| SubmissionError::DirectoryWalk {
            path: src.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| SubmissionError::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| SubmissionError::io(entry.path(), e))?;
            copied += 1;
        }
    }

    tracing::debug!(src = %src.display(), dst = %dst.display(), files = copied, "copied directory");
    Ok(())
}
