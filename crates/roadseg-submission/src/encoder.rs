//! Conversion of discretized masks into the competition CSV format.
//!
//! Every mask is cut into 16x16 blocks; a block is labelled road when its
//! mean intensity exceeds the foreground threshold. Each block becomes one
//! row `NNN_x_y,label`, where `NNN` is the image number taken from the file
//! name and `(x, y)` the block's top-left pixel.

use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use roadseg_util::ImageUtils;

use crate::error::{SubmissionError, SubmissionResult};

/// Side of a submission block in pixels.
pub const BLOCK_SIZE: u32 = 16;

/// CSV header line.
pub const CSV_HEADER: &str = "id,prediction";

/// One labelled 16x16 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionRow {
    pub image_number: u32,
    pub x: u32,
    pub y: u32,
    pub label: u8,
}

impl SubmissionRow {
    /// Row identifier, e.g. `012_16_32`.
    pub fn id(&self) -> String {
        format!("{:03}_{}_{}", self.image_number, self.x, self.y)
    }
}

impl fmt::Display for SubmissionRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}_{}_{},{}",
            self.image_number, self.x, self.y, self.label
        )
    }
}

/// Row order of the written CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionOrder {
    /// Files in the order given, blocks column by column within a file.
    #[default]
    Input,
    /// Sorted by image number, then `x`, then `y`.
    Sorted,
}

/// Image number of a mask: the first run of digits in its file name.
///
/// # Errors
///
/// [`SubmissionError::MissingImageNumber`] if the name has no digits.
pub fn parse_image_number(path: &Path) -> SubmissionResult<u32> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();

    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();

    if digits.is_empty() {
        return Err(SubmissionError::MissingImageNumber {
            path: path.to_path_buf(),
        });
    }

    digits
        .parse()
        .map_err(|_| SubmissionError::InvalidImageNumber {
            path: path.to_path_buf(),
            digits,
        })
}

/// Label every 16x16 block of one mask.
///
/// Blocks are visited with `x` as the outer and `y` as the inner loop. Blocks
/// at the right and bottom border may be partial; their mean covers only the
/// pixels that exist. A pixel's foreground value is the mean of its red,
/// green and blue channels over 255.
pub fn mask_to_submission_rows(path: &Path, threshold: f32) -> SubmissionResult<Vec<SubmissionRow>> {
    let image_number = parse_image_number(path)?;
    let mask = ImageUtils::open(path)?.into_rgb8();
    let (width, height) = mask.dimensions();

    let mut rows = Vec::new();
    for x in (0..width).step_by(BLOCK_SIZE as usize) {
        for y in (0..height).step_by(BLOCK_SIZE as usize) {
            let x_end = (x + BLOCK_SIZE).min(width);
            let y_end = (y + BLOCK_SIZE).min(height);

            let mut sum = 0.0f32;
            for py in y..y_end {
                for px in x..x_end {
                    let channels = mask.get_pixel(px, py).0;
                    sum += channels.iter().map(|&c| f32::from(c)).sum::<f32>() / (3.0 * 255.0);
                }
            }
            let mean = sum / ((x_end - x) * (y_end - y)) as f32;

            rows.push(SubmissionRow {
                image_number,
                x,
                y,
                label: u8::from(mean > threshold),
            });
        }
    }

    Ok(rows)
}

/// Encode `files` into one CSV at `csv_path`.
///
/// Returns the number of rows written.
pub fn masks_to_submission<P: AsRef<Path>>(
    csv_path: &Path,
    files: &[P],
    threshold: f32,
    order: SubmissionOrder,
) -> SubmissionResult<usize> {
    let mut rows = Vec::new();
    for file in files {
        rows.extend(mask_to_submission_rows(file.as_ref(), threshold)?);
    }

    if order == SubmissionOrder::Sorted {
        rows.sort_by_key(|row| (row.image_number, row.x, row.y));
    }

    let file = File::create(csv_path).map_err(|e| SubmissionError::io(csv_path, e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{CSV_HEADER}").map_err(|e| SubmissionError::io(csv_path, e))?;
    for row in &rows {
        writeln!(writer, "{row}").map_err(|e| SubmissionError::io(csv_path, e))?;
    }
    writer.flush().map_err(|e| SubmissionError::io(csv_path, e))?;

    tracing::info!(
        csv = %csv_path.display(),
        masks = files.len(),
        rows = rows.len(),
        "wrote submission"
    );
    Ok(rows.len())
}

/// Encode every image file directly inside `dir`.
pub fn directory_to_submission(
    csv_path: &Path,
    dir: &Path,
    threshold: f32,
    order: SubmissionOrder,
) -> SubmissionResult<usize> {
    if !dir.is_dir() {
        return Err(SubmissionError::MissingDirectory {
            path: dir.to_path_buf(),
        });
    }
    let files: Vec<PathBuf> = roadseg_util::list_image_files(dir)?;
    masks_to_submission(csv_path, &files, threshold, order)
}
