//! Command implementations behind the `roadseg` binary.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor};
use roadseg_data::{
    predict_image, Acceptance, CenterCropPredictor, ImageAugmentor, ImageMaskSource, PatchPairs,
    PatchPipeline, RoadDataset, TestImages,
};
use roadseg_submission::{directory_to_submission, SubmissionOrder};
use roadseg_util::ImageUtils;

use crate::config::{write_config_file, RunConfig};

/// Encode a directory of discretized masks into a submission CSV.
pub fn run_submit(
    masks: &Path,
    output: &Path,
    threshold: f32,
    order: SubmissionOrder,
) -> Result<usize> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rows = directory_to_submission(output, masks, threshold, order)
        .with_context(|| format!("failed to encode masks in {}", masks.display()))?;
    Ok(rows)
}

/// File name of the config dump written next to results.
pub const CONFIG_DUMP_NAME: &str = "config.cfg";

/// Archive the run described by `config` under `identifier`.
///
/// Returns the archive directory, or `None` when submission logging is off.
pub fn run_log_submission(config: &RunConfig, identifier: &str) -> Result<Option<PathBuf>> {
    if !config.sub_log {
        tracing::info!(identifier, "submission logging disabled, nothing archived");
        return Ok(None);
    }
    let log = config.submission_log(identifier)?;
    let path = log
        .write()
        .with_context(|| format!("failed to log submission '{identifier}'"))?;
    Ok(Some(path))
}

/// Dump `config` into `dir` when argument logging is on.
fn log_run_config(config: &RunConfig, dir: &Path) -> Result<()> {
    if config.arg_log {
        write_config_file(config, &dir.join(CONFIG_DUMP_NAME))?;
        tracing::debug!(dir = %dir.display(), "wrote run configuration");
    }
    Ok(())
}

/// Acceptance statistics of a sampling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleSummary {
    pub batches: usize,
    pub patches: usize,
    pub road: usize,
    pub skipped: usize,
    pub attempts: usize,
}

impl SampleSummary {
    fn record<B: Backend>(&mut self, pairs: &PatchPairs<B>) {
        self.batches += 1;
        for anchor in &pairs.anchors {
            self.patches += 1;
            self.attempts += anchor.attempts;
            match anchor.acceptance {
                Acceptance::Road => self.road += 1,
                Acceptance::Skip => self.skipped += 1,
            }
        }
    }
}

/// Build the training pipeline of `config`.
///
/// The validation set is used when its directories exist.
pub fn build_pipeline<B: Backend>(config: &RunConfig, device: &B::Device) -> Result<PatchPipeline<B>> {
    let train = RoadDataset::new(&config.train_paths(), config.target_size)
        .context("failed to index training data")?;
    let augmentor = ImageAugmentor::new(config.augmentation()?);
    let train = ImageMaskSource::new(
        train,
        Some(augmentor),
        config.batch_size,
        config.seed,
        device.clone(),
    )?;

    let validation_paths = config.validation_paths();
    let validation = if validation_paths.image_root().is_dir() {
        let dataset = RoadDataset::new(&validation_paths, config.target_size)
            .context("failed to index validation data")?;
        Some(ImageMaskSource::new(dataset, None, 1, config.seed, device.clone())?)
    } else {
        tracing::warn!(
            path = %validation_paths.image_root().display(),
            "validation directory missing, running without validation patches"
        );
        None
    };

    Ok(PatchPipeline::new(
        train,
        validation,
        config.sampler()?,
        config.val_steps,
        config.seed,
    )?)
}

/// Draw `steps` training batches and optionally write every patch pair as PNG.
pub fn run_sample<B: Backend>(
    config: &RunConfig,
    steps: usize,
    output: Option<&Path>,
    device: &B::Device,
) -> Result<SampleSummary> {
    let mut pipeline = build_pipeline::<B>(config, device)?;
    if let Some(dir) = output {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        log_run_config(config, dir)?;
    }

    let mut summary = SampleSummary::default();
    for step in 0..steps {
        let pairs = pipeline
            .next_train_batch()
            .with_context(|| format!("failed to draw training batch {step}"))?;
        summary.record(&pairs);

        if let Some(dir) = output {
            save_pairs(&pairs, dir, step)?;
        }
    }

    tracing::info!(
        batches = summary.batches,
        patches = summary.patches,
        road = summary.road,
        skipped = summary.skipped,
        attempts = summary.attempts,
        "sampled training patches"
    );
    Ok(summary)
}

fn save_pairs<B: Backend>(pairs: &PatchPairs<B>, dir: &Path, step: usize) -> Result<()> {
    let [count, context_size, _, channels] = pairs.contexts.dims();
    let [_, patch_size, _, _] = pairs.targets.dims();

    for i in 0..count {
        let context: Tensor<B, 3> = pairs
            .contexts
            .clone()
            .narrow(0, i, 1)
            .reshape([context_size, context_size, channels]);
        let target: Tensor<B, 3> = pairs
            .targets
            .clone()
            .narrow(0, i, 1)
            .reshape([patch_size, patch_size, 1]);

        ImageUtils::save_tensor(context, dir.join(format!("{step:04}_{i}_context.png")))?;
        ImageUtils::save_tensor(target, dir.join(format!("{step:04}_{i}_target.png")))?;
    }
    Ok(())
}

/// Tile every test image, pass the tiles through the centre-crop predictor
/// and write the reassembled images to `output`.
///
/// Returns the number of images written.
pub fn run_tile<B: Backend>(config: &RunConfig, output: &Path, device: &B::Device) -> Result<usize> {
    let geometry = config.geometry()?;
    let images = TestImages::<B>::new(config.test_image_dir(), config.target_size, device.clone())
        .context("failed to list test images")?;
    fs::create_dir_all(output).with_context(|| format!("failed to create {}", output.display()))?;
    log_run_config(config, output)?;

    let predictor = CenterCropPredictor::new(geometry);
    let side = config.target_size as usize;
    let mut written = 0;

    for item in images.iter() {
        let (path, image) = item?;
        let prediction = predict_image(&predictor, image, geometry, config.batch_size)
            .with_context(|| format!("failed to tile {}", path.display()))?;

        let Some(name) = path.file_name() else {
            continue;
        };
        ImageUtils::save_tensor(prediction.reshape([side, side, 1]), output.join(name))?;
        written += 1;
        tracing::debug!(image = %path.display(), "wrote reassembled image");
    }

    tracing::info!(images = written, output = %output.display(), "tiled test images");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    type TestBackend = burn::backend::NdArray;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("roadseg-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_split(root: &Path, count: usize) {
        fs::create_dir_all(root.join("images")).unwrap();
        fs::create_dir_all(root.join("groundtruth")).unwrap();
        for i in 0..count {
            let name = format!("satImage_{i:03}.png");
            RgbImage::from_fn(40, 40, |x, y| Rgb([(x * 6) as u8, (y * 6) as u8, 90]))
                .save(root.join("images").join(&name))
                .unwrap();
            GrayImage::from_fn(40, 40, |_, y| Luma([if (16..24).contains(&y) { 255 } else { 0 }]))
                .save(root.join("groundtruth").join(&name))
                .unwrap();
        }
    }

    fn small_config(root: &Path) -> RunConfig {
        RunConfig::new()
            .with_train_path(root.join("training").display().to_string())
            .with_val_path(root.join("validation").display().to_string())
            .with_test_path(root.join("test").display().to_string())
            .with_patch_size(4)
            .with_target_size(32)
            .with_batch_size(2)
            .with_val_steps(2)
    }

    #[test]
    fn sample_draws_one_patch_per_image_and_saves_pairs() {
        let root = scratch_dir("cmd-sample");
        write_split(&root.join("training"), 3);
        write_split(&root.join("validation"), 1);
        let config = small_config(&root);
        let output = root.join("patches");

        let summary =
            run_sample::<TestBackend>(&config, 2, Some(&output), &Default::default()).unwrap();

        // Three images with batch size two: the second batch closes the epoch
        // with a single image.
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.patches, 3);
        assert_eq!(summary.road + summary.skipped, 3);
        assert!(summary.attempts >= 3);
        assert!(output.join("0000_0_context.png").is_file());
        assert!(output.join("0000_1_target.png").is_file());
        assert!(output.join("0001_0_target.png").is_file());
        assert!(!output.join("0001_1_target.png").exists());
    }

    #[test]
    fn pipeline_runs_without_validation_directory() {
        let root = scratch_dir("cmd-no-val");
        write_split(&root.join("training"), 2);
        let config = small_config(&root);

        let mut pipeline = build_pipeline::<TestBackend>(&config, &Default::default()).unwrap();
        assert!(pipeline.next_validation_batch().is_none());
        assert_eq!(pipeline.next_train_batch().unwrap().len(), 2);
    }

    #[test]
    fn tile_reassembles_every_test_image() {
        let root = scratch_dir("cmd-tile");
        let test_images = root.join("test").join("images");
        fs::create_dir_all(&test_images).unwrap();
        for name in ["test_1.png", "test_2.png"] {
            RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]))
                .save(test_images.join(name))
                .unwrap();
        }
        let config = small_config(&root);
        let output = root.join("test").join("results").join("continuous");

        let written = run_tile::<TestBackend>(&config, &output, &Default::default()).unwrap();

        assert_eq!(written, 2);
        let reassembled = image::open(output.join("test_1.png")).unwrap().into_luma8();
        assert_eq!(reassembled.dimensions(), (32, 32));
        assert!(reassembled.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn config_dump_follows_arg_log() {
        let root = scratch_dir("cmd-arg-log");
        write_split(&root.join("training"), 2);
        let test_images = root.join("test").join("images");
        fs::create_dir_all(&test_images).unwrap();
        RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]))
            .save(test_images.join("test_1.png"))
            .unwrap();

        let quiet = small_config(&root).with_arg_log(false);
        let patches = root.join("patches");
        run_sample::<TestBackend>(&quiet, 1, Some(&patches), &Default::default()).unwrap();
        assert!(patches.join("0000_0_target.png").is_file());
        assert!(!patches.join(CONFIG_DUMP_NAME).exists());

        let logged = small_config(&root);
        let tiles = root.join("tiles");
        run_tile::<TestBackend>(&logged, &tiles, &Default::default()).unwrap();
        let dump = fs::read_to_string(tiles.join(CONFIG_DUMP_NAME)).unwrap();
        assert!(dump.contains("patch-size = 4\n"));
        assert!(dump.contains("arg-log = True\n"));
    }

    #[test]
    fn log_submission_archives_only_when_enabled() {
        let root = scratch_dir("cmd-log-submission");
        let model = root.join("tmp").join("model.mpk");
        fs::create_dir_all(model.parent().unwrap()).unwrap();
        fs::write(&model, b"weights").unwrap();
        let results = root.join("test").join("results");
        for name in roadseg_submission::RESULT_DIRECTORIES {
            fs::create_dir_all(results.join(name)).unwrap();
        }
        for name in ["discrete", "discrete_post"] {
            GrayImage::from_pixel(16, 16, Luma([255]))
                .save(results.join(name).join("test_1.png"))
                .unwrap();
        }
        let out = root.join("out");
        let config = small_config(&root)
            .with_model_path(model.display().to_string())
            .with_out_path(out.display().to_string())
            .with_train_model(false);

        let skipped = run_log_submission(&config.clone().with_sub_log(false), "run").unwrap();
        assert!(skipped.is_none());
        assert!(!out.exists());

        let archived = run_log_submission(&config, "run").unwrap().unwrap();
        assert_eq!(archived, out.join("run"));
        assert_eq!(
            fs::read_to_string(archived.join("submission.csv")).unwrap(),
            "id,prediction\n001_0_0,1\n"
        );
        assert!(fs::read_to_string(archived.join(CONFIG_DUMP_NAME))
            .unwrap()
            .contains("sub-log = True\n"));
    }

    #[test]
    fn submit_writes_csv_for_mask_directory() {
        let root = scratch_dir("cmd-submit");
        let masks = root.join("discrete");
        fs::create_dir_all(&masks).unwrap();
        GrayImage::from_pixel(32, 16, Luma([255]))
            .save(masks.join("test_7.png"))
            .unwrap();
        let csv = root.join("out").join("submission.csv");

        let rows = run_submit(&masks, &csv, 0.5, SubmissionOrder::Sorted).unwrap();

        assert_eq!(rows, 2);
        assert_eq!(
            fs::read_to_string(&csv).unwrap(),
            "id,prediction\n007_0_0,1\n007_16_0,1\n"
        );
    }
}
